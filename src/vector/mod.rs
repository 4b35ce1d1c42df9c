//! Vector collections
//!
//! [`VectorStore`] is the storage primitive (create/delete collections,
//! add/get/delete passages, exact nearest-neighbour query). Two stores ship
//! with the crate: [`SqliteVectorStore`] for persistent use and
//! [`MemoryVectorStore`] for tests and ephemeral indexes.
//!
//! [`VectorCollection`] wraps a store with the policies the rest of the crate
//! relies on: collection naming, dimension checks, remove-by-document and
//! rename-by-copy.

mod collection;
mod memory;
mod sqlite;
mod store;

pub use collection::{production_collection_name, ScoredPassage, VectorCollection};
pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;
pub use store::{cosine_distance, VectorStore};

use crate::extract::FileType;
use serde::{Deserialize, Serialize};

/// Metadata stored with every passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub document_id: String,
    pub filename: String,
    pub file_type: FileType,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// One passage as stored in a collection
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: PassageMetadata,
}

/// Query match returned by a store, nearest first
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: PassageMetadata,
    pub distance: f32,
}

/// Passage id for the `index`-th chunk of a document
pub fn passage_id(document_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", document_id, index)
}
