//! Knowledge bases and their documents
//!
//! [`Catalog`] persists knowledge-base and document metadata in SQLite.
//! Each knowledge base carries its own [`KnowledgeBaseConfig`].

mod catalog;
mod config;

pub use catalog::Catalog;
pub use config::{KnowledgeBaseConfig, KnowledgeBaseConfigUpdate, SearchSettings};

use crate::error::{KbError, Result};
use crate::extract::FileType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub config: KnowledgeBaseConfig,
    /// Model the production collection was built with
    pub indexed_model: String,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kb_id: String,
    pub filename: String,
    /// Stored copy of the uploaded file
    pub file_path: PathBuf,
    pub file_type: FileType,
    pub file_size: u64,
    pub chunk_count: usize,
    pub processed_at: DateTime<Utc>,
}

/// Knowledge base statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbStats {
    pub kb_id: String,
    pub name: String,
    pub file_count: usize,
    pub total_size: u64,
    pub total_chunks: usize,
    pub file_types: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
    /// Passages currently in the production collection
    pub indexed_passages: usize,
    pub searchable: bool,
    pub indexed_model: String,
    pub reindexing: bool,
}

/// Trimmed knowledge base name, 1 to 100 characters
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS {
        return Err(KbError::InvalidInput(format!(
            "Name must be 1 to {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

pub fn validate_description(description: &str) -> Result<()> {
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(KbError::InvalidInput(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_CHARS
        )));
    }
    Ok(())
}
