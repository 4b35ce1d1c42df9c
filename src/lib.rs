//! kbindex - knowledge-base indexing with hybrid retrieval
//!
//! Documents are chunked into passages, embedded and stored per knowledge
//! base. Queries rank passages by vector similarity, optionally fused with
//! BM25 relevance. A knowledge base can be rebuilt with new settings in the
//! background while its current index keeps serving queries.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod knowledge_base;
pub mod lexical;
pub mod reindex;
pub mod retrieval;
pub mod service;
pub mod storage;
pub mod vector;

pub use error::{KbError, Result};
pub use service::KnowledgeBaseService;
