//! BM25 index over an in-memory corpus, backed by the `bm25` crate
use ahash::AHashMap;
use bm25::{Embedder, EmbedderBuilder, Scorer};

/// Lower-case whitespace tokenization, shared by indexing and querying
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// [`bm25::Tokenizer`] applying [`tokenize`], so the embedder splits text
/// exactly like the rest of the crate
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl bm25::Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        tokenize(input_text)
    }
}

/// BM25 index built from a fixed corpus of passage texts.
///
/// Passages are keyed by their position in the corpus. The embedder is fitted
/// to the corpus' average passage length.
pub struct LexicalIndex {
    texts: Vec<String>,
    embedder: Embedder<u32, WhitespaceTokenizer>,
    scorer: Scorer<usize>,
    k1: f32,
    b: f32,
}

impl LexicalIndex {
    /// Build an index. Returns `None` for an empty corpus.
    pub fn build(texts: Vec<String>, k1: f32, b: f32) -> Option<Self> {
        if texts.is_empty() {
            return None;
        }

        let total_tokens: usize = texts.iter().map(|t| tokenize(t).len()).sum();
        let avgdl = (total_tokens as f32 / texts.len() as f32).max(1.0);

        let embedder = EmbedderBuilder::<u32, WhitespaceTokenizer>::with_avgdl(avgdl)
            .k1(k1)
            .b(b)
            .build();

        let mut scorer = Scorer::<usize>::new();
        for (position, text) in texts.iter().enumerate() {
            scorer.upsert(&position, embedder.embed(text));
        }

        Some(Self {
            texts,
            embedder,
            scorer,
            k1,
            b,
        })
    }

    /// Score every passage against the query tokens, in corpus order
    pub fn score_all(&self, query_tokens: &[String]) -> Vec<f32> {
        if query_tokens.is_empty() {
            return vec![0.0; self.texts.len()];
        }
        let query = self.embedder.embed(&query_tokens.join(" "));
        (0..self.texts.len())
            .map(|position| {
                self.scorer
                    .score(&position, &query)
                    .unwrap_or(0.0)
                    .max(0.0)
            })
            .collect()
    }

    /// Score a raw query and key the results by passage text
    pub fn scores_by_text(&self, query: &str) -> LexicalScores {
        let scores = self.score_all(&tokenize(query));
        LexicalScores::from_pairs(self.texts.iter().cloned().zip(scores))
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Parameters the index was built with
    pub fn params(&self) -> (f32, f32) {
        (self.k1, self.b)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("passages", &self.texts.len())
            .field("k1", &self.k1)
            .field("b", &self.b)
            .finish()
    }
}

/// Raw BM25 scores of one query over the whole corpus
#[derive(Debug, Clone, Default)]
pub struct LexicalScores {
    by_text: AHashMap<String, f32>,
    max: f32,
}

impl LexicalScores {
    /// Collect precomputed `(passage text, raw score)` pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, f32)>) -> Self {
        let by_text: AHashMap<String, f32> = pairs.into_iter().collect();
        let max = by_text.values().copied().fold(0.0_f32, f32::max);
        Self { by_text, max }
    }

    /// Raw score of a passage; unknown passages score zero
    pub fn get(&self, text: &str) -> f32 {
        self.by_text.get(text).copied().unwrap_or(0.0)
    }

    /// Highest raw score over the corpus (never below zero)
    pub fn max(&self) -> f32 {
        self.max
    }
}
