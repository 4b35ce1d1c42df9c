//! Sentence-based passage chunking
//!
//! Text is split on `.`, `!` and `?` into sentence-like units which are packed
//! into passages bounded by an estimated token budget. Token counts are
//! estimated as `words × 1.3`. With overlap enabled, each new passage is seeded
//! with the trailing words of the previous one.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Rough tokens-per-word ratio used for size estimation
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Passages with this many words or fewer are discarded
pub const MIN_PASSAGE_WORDS: usize = 10;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

fn sentence_boundary() -> &'static Regex {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    BOUNDARY.get_or_init(|| Regex::new(r"[.!?]+").expect("sentence boundary pattern is valid"))
}

/// Chunking parameters for one knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Target passage size in estimated tokens
    pub chunk_size: usize,
    /// Overlap carried into the next passage, in estimated tokens
    pub chunk_overlap: usize,
    pub overlap_enabled: bool,
}

impl ChunkingParams {
    /// Build parameters, substituting defaults for unset values
    pub fn resolve(
        chunk_size: Option<usize>,
        chunk_overlap: Option<usize>,
        overlap_enabled: bool,
    ) -> Self {
        Self {
            chunk_size: chunk_size
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
            overlap_enabled,
        }
    }

    /// Number of words carried over between passages
    pub fn overlap_words(&self) -> usize {
        if self.overlap_enabled {
            (self.chunk_overlap as f64 / TOKENS_PER_WORD) as usize
        } else {
            0
        }
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self::resolve(None, None, true)
    }
}

/// Estimated token count of a piece of text
pub fn estimate_tokens(text: &str) -> f64 {
    word_count(text) as f64 * TOKENS_PER_WORD
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into ordered, overlapping passages.
///
/// Empty or whitespace-only input yields no passages. The function is pure:
/// identical input and parameters always produce the identical sequence.
pub fn chunk_text(text: &str, params: &ChunkingParams) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunk_size = params.chunk_size as f64;
    let overlap_words = params.overlap_words();

    let mut passages = Vec::new();
    let mut current = String::new();

    for sentence in sentence_boundary().split(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        let would_overflow = estimate_tokens(&current) + estimate_tokens(sentence) > chunk_size;
        if would_overflow && !current.is_empty() {
            passages.push(current.trim().to_string());

            current = match trailing_words(&current, overlap_words) {
                Some(tail) => format!("{} {}. ", tail, sentence),
                None => format!("{}. ", sentence),
            };
        } else {
            current.push_str(sentence);
            current.push_str(". ");
        }
    }

    if !current.trim().is_empty() {
        passages.push(current.trim().to_string());
    }

    passages.retain(|p| word_count(p) > MIN_PASSAGE_WORDS);
    passages
}

/// Last `n` words of `passage`, capped at its word count
fn trailing_words(passage: &str, n: usize) -> Option<String> {
    let words: Vec<&str> = passage.split_whitespace().collect();
    let n = n.min(words.len());
    if n == 0 {
        return None;
    }
    Some(words[words.len() - n..].join(" "))
}
