/// Weighted fusion of vector similarity and BM25 relevance
use super::SearchResult;
use crate::lexical::LexicalScores;
use crate::vector::ScoredPassage;

/// Number of vector candidates to fetch for a request.
///
/// Hybrid mode over-fetches `min(multiplier × limit, cap)` so fusion has room
/// to re-rank; vector mode fetches exactly `limit`.
pub fn candidate_count(limit: usize, hybrid: bool, multiplier: usize, cap: usize) -> usize {
    if hybrid {
        limit.saturating_mul(multiplier).min(cap).max(limit)
    } else {
        limit
    }
}

/// Fuse vector candidates with lexical scores.
///
/// `candidates` must be in vector order (most similar first). Each candidate
/// scores `alpha × similarity + (1 − alpha) × bm25 / max_bm25`, where the
/// maximum is taken over the whole corpus and replaced by 1 when it is not
/// positive. Without lexical scores the vector order is kept, truncated to
/// `limit`, and the result carries no BM25 or hybrid scores.
pub fn fuse(
    candidates: Vec<ScoredPassage>,
    lexical: Option<&LexicalScores>,
    alpha: f32,
    limit: usize,
) -> Vec<SearchResult> {
    let Some(lexical) = lexical else {
        return candidates
            .into_iter()
            .take(limit)
            .map(|c| to_result(c, None, None))
            .collect();
    };

    let max = if lexical.max() > 0.0 { lexical.max() } else { 1.0 };

    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .map(|c| {
            let raw = lexical.get(&c.text);
            let hybrid = alpha * c.similarity + (1.0 - alpha) * (raw / max);
            to_result(c, Some(raw), Some(hybrid))
        })
        .collect();

    // Stable: equal hybrid scores keep vector order
    results.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}

fn to_result(passage: ScoredPassage, bm25: Option<f32>, hybrid: Option<f32>) -> SearchResult {
    SearchResult {
        content: passage.text,
        filename: passage.metadata.filename,
        file_type: passage.metadata.file_type,
        similarity_score: passage.similarity,
        chunk_index: passage.metadata.chunk_index,
        document_id: passage.metadata.document_id,
        bm25_score: bm25,
        hybrid_score: hybrid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FileType;
    use crate::lexical::LexicalIndex;
    use crate::vector::PassageMetadata;

    fn passage(text: &str, similarity: f32) -> ScoredPassage {
        ScoredPassage {
            id: format!("{}_chunk_0", text),
            text: text.to_string(),
            metadata: PassageMetadata {
                document_id: text.to_string(),
                filename: format!("{}.txt", text),
                file_type: FileType::Text,
                chunk_index: 0,
                total_chunks: 1,
            },
            similarity,
        }
    }

    fn lexical_for(query: &str, corpus: &[&str]) -> LexicalScores {
        let index = LexicalIndex::build(
            corpus.iter().map(|s| s.to_string()).collect(),
            1.5,
            0.75,
        )
        .unwrap();
        index.scores_by_text(query)
    }

    #[test]
    fn test_candidate_count() {
        assert_eq!(candidate_count(10, false, 3, 100), 10);
        assert_eq!(candidate_count(10, true, 3, 100), 30);
        assert_eq!(candidate_count(50, true, 3, 100), 100);
        assert_eq!(candidate_count(1, true, 3, 100), 3);
    }

    #[test]
    fn test_normalized_scores_reverse_order() {
        // Vector similarities [0.9, 0.4], normalized BM25 [0.1, 0.8]
        let candidates = vec![passage("first", 0.9), passage("second", 0.4)];
        let lexical = synthetic_scores(&[("first", 0.1), ("second", 0.8), ("best", 1.0)]);
        let results = fuse(candidates, Some(&lexical), 0.5, 10);

        assert_eq!(results[0].content, "second");
        assert_eq!(results[1].content, "first");
        assert!((results[0].hybrid_score.unwrap() - 0.6).abs() < 1e-6);
        assert!((results[1].hybrid_score.unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(results[1].bm25_score, Some(0.1));
    }

    #[test]
    fn test_alpha_one_keeps_vector_order() {
        let candidates = vec![
            passage("apples", 0.8),
            passage("pears", 0.6),
            passage("plums", 0.3),
        ];
        let lexical = lexical_for("plums", &["apples", "pears", "plums"]);
        let results = fuse(candidates, Some(&lexical), 1.0, 10);
        let order: Vec<_> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["apples", "pears", "plums"]);
    }

    #[test]
    fn test_alpha_zero_ranks_lexically() {
        let candidates = vec![passage("apples", 0.8), passage("plums", 0.3)];
        let lexical = lexical_for("plums", &["apples", "pears", "plums"]);
        let results = fuse(candidates, Some(&lexical), 0.0, 10);
        assert_eq!(results[0].content, "plums");
        assert!((results[0].hybrid_score.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_lexical_index_falls_back() {
        let candidates = vec![
            passage("a", 0.9),
            passage("b", 0.7),
            passage("c", 0.5),
        ];
        let results = fuse(candidates, None, 0.5, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "a");
        assert_eq!(results[1].content, "b");
        assert!(results[0].bm25_score.is_none());
        assert!(results[0].hybrid_score.is_none());
    }

    #[test]
    fn test_zero_lexical_max_does_not_divide_by_zero() {
        let candidates = vec![passage("a", 0.9), passage("b", 0.7)];
        let lexical = lexical_for("nothing", &["a", "b"]);
        let results = fuse(candidates, Some(&lexical), 0.5, 10);
        assert!((results[0].hybrid_score.unwrap() - 0.45).abs() < 1e-6);
        assert!(results.iter().all(|r| r.hybrid_score.unwrap().is_finite()));
    }

    #[test]
    fn test_truncates_to_limit() {
        let candidates: Vec<_> = (0..30)
            .map(|i| passage(&format!("p{}", i), 1.0 - i as f32 / 100.0))
            .collect();
        let lexical = lexical_for("p29", &["p0", "p1", "p29"]);
        let results = fuse(candidates, Some(&lexical), 0.5, 10);
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].content, "p29");
    }

    fn synthetic_scores(pairs: &[(&str, f32)]) -> LexicalScores {
        LexicalScores::from_pairs(pairs.iter().map(|(t, s)| (t.to_string(), *s)))
    }
}
