/// Per-knowledge-base settings
use crate::chunking::ChunkingParams;
use crate::config::{check_chunking, check_search, Config};
use crate::error::{KbError, Result, ValidationError};
use serde::{Deserialize, Serialize};

/// Search settings of one knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub hybrid_search: bool,
    /// Weight of vector similarity in the hybrid score
    pub hybrid_alpha: f32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
}

/// Settings a knowledge base is indexed and searched with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    pub embedding_model: String,
    pub chunking: ChunkingParams,
    pub search: SearchSettings,
}

impl KnowledgeBaseConfig {
    /// Seed a new knowledge base from the application defaults
    pub fn from_defaults(config: &Config) -> Self {
        Self {
            embedding_model: config.embedding.model.clone(),
            chunking: ChunkingParams::resolve(
                Some(config.chunking.chunk_size),
                Some(config.chunking.chunk_overlap),
                config.chunking.overlap_enabled,
            ),
            search: SearchSettings {
                hybrid_search: config.search.hybrid_search,
                hybrid_alpha: config.search.hybrid_alpha,
                bm25_k1: config.search.bm25_k1,
                bm25_b: config.search.bm25_b,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.embedding_model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding_model",
                "Embedding model cannot be empty",
            ));
        }
        check_chunking(
            "chunking",
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
            &mut errors,
        );
        check_search(
            "search",
            self.search.hybrid_alpha,
            self.search.bm25_k1,
            self.search.bm25_b,
            &mut errors,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KbError::ConfigValidation { errors })
        }
    }

    /// Apply a partial update, returning the validated result
    pub fn apply(&self, update: &KnowledgeBaseConfigUpdate) -> Result<Self> {
        let mut next = self.clone();

        if let Some(model) = &update.embedding_model {
            next.embedding_model = model.trim().to_string();
        }
        if let Some(size) = update.chunk_size {
            next.chunking.chunk_size = size;
        }
        if let Some(overlap) = update.chunk_overlap {
            next.chunking.chunk_overlap = overlap;
        }
        if let Some(enabled) = update.overlap_enabled {
            next.chunking.overlap_enabled = enabled;
        }
        if let Some(hybrid) = update.hybrid_search {
            next.search.hybrid_search = hybrid;
        }
        if let Some(alpha) = update.hybrid_alpha {
            next.search.hybrid_alpha = alpha;
        }
        if let Some(k1) = update.bm25_k1 {
            next.search.bm25_k1 = k1;
        }
        if let Some(b) = update.bm25_b {
            next.search.bm25_b = b;
        }

        next.validate()?;
        Ok(next)
    }

    /// Whether moving from `self` to `other` changes how passages are built
    pub fn needs_reindex(&self, other: &Self) -> bool {
        self.embedding_model != other.embedding_model || self.chunking != other.chunking
    }
}

/// Partial update of a [`KnowledgeBaseConfig`]; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseConfigUpdate {
    pub embedding_model: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub overlap_enabled: Option<bool>,
    pub hybrid_search: Option<bool>,
    pub hybrid_alpha: Option<f32>,
    pub bm25_k1: Option<f32>,
    pub bm25_b: Option<f32>,
}

impl KnowledgeBaseConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.embedding_model.is_none()
            && self.chunk_size.is_none()
            && self.chunk_overlap.is_none()
            && self.overlap_enabled.is_none()
            && self.hybrid_search.is_none()
            && self.hybrid_alpha.is_none()
            && self.bm25_k1.is_none()
            && self.bm25_b.is_none()
    }
}
