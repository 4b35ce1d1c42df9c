use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kbindex
#[derive(Error, Debug)]
pub enum KbError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Knowledge base not found: {id}")]
    KnowledgeBaseNotFound { id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Knowledge base with name '{name}' already exists")]
    DuplicateName { name: String },

    /// A reindex job holds the knowledge base lock
    #[error("Knowledge base {id} is busy: reindex in progress")]
    KnowledgeBaseBusy { id: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {size} bytes (maximum {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Empty file: {path}")]
    EmptyFile { path: PathBuf },

    /// Extraction produced no text
    #[error("No text content found in {file}")]
    ExtractionEmpty { file: String },

    /// Text was extracted but chunking kept no passage
    #[error("Could not create text chunks from {file}")]
    NoPassages { file: String },

    #[error("Unsupported file type '{file_type}' for {file}")]
    UnsupportedFormat { file: String, file_type: String },

    /// Query against a knowledge base with no built index
    #[error("Knowledge base is not searchable: collection {name} does not exist")]
    CollectionMissing { name: String },

    #[error("Collection already exists: {name}")]
    CollectionExists { name: String },

    #[error("Dimension mismatch in {collection}: expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Model resolution failed for '{model}': {message}")]
    ModelResolution { model: String, message: String },

    /// Production collection was deleted but the rebuilt one could not be renamed
    /// into place. The knowledge base is unsearchable until repaired.
    #[error("Swap failed for knowledge base {kb_id}: {message} (rebuilt index kept in {temp_collection})")]
    SwapFailure {
        kb_id: String,
        temp_collection: String,
        message: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// Poisoned lock helper
    pub(crate) fn poisoned(what: &str) -> Self {
        KbError::Other(anyhow::anyhow!("lock poisoned: {}", what))
    }

    /// Whether the caller should retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KbError::KnowledgeBaseBusy { .. } | KbError::CollectionMissing { .. }
        )
    }
}

impl From<crate::embedding::EmbeddingError> for KbError {
    fn from(err: crate::embedding::EmbeddingError) -> Self {
        KbError::Embedding(err.to_string())
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for kbindex operations
pub type Result<T> = std::result::Result<T, KbError>;
