//! Query-side ranking
//!
//! Vector candidates come from [`crate::vector::VectorCollection::query`];
//! [`fuse`] blends them with normalized BM25 scores when hybrid search is on.

mod hybrid;

pub use hybrid::{candidate_count, fuse};

use crate::extract::FileType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One ranked passage returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub filename: String,
    pub file_type: FileType,
    /// `1 - distance` from the vector store
    pub similarity_score: f32,
    pub chunk_index: usize,
    pub document_id: String,
    /// Raw BM25 score, present in hybrid mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_score: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    Hybrid,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchType::Vector => f.write_str("vector"),
            SearchType::Hybrid => f.write_str("hybrid"),
        }
    }
}

/// Results of one query against one knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub kb_id: String,
    pub query: String,
    pub search_type: SearchType,
    pub total_results: usize,
    pub results: Vec<SearchResult>,
}

/// Documents related to a source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarDocument {
    pub document_id: String,
    pub filename: String,
    pub file_type: FileType,
    pub similarity_score: f32,
    /// Best-matching passage of the related document
    pub preview: String,
}
