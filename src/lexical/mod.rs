//! Lexical relevance scoring
//!
//! [`LexicalIndex`] is a BM25 index (the `bm25` crate's embedder and scorer)
//! over every passage text of one collection. [`LexicalIndexCache`] keeps one
//! index per knowledge base and drops it whenever that knowledge base's
//! passages change.

mod cache;
mod index;

pub use cache::LexicalIndexCache;
pub use index::{tokenize, LexicalIndex, LexicalScores, WhitespaceTokenizer};
