//! Embedding layer
//!
//! - [`EmbeddingProvider`] abstracts one loaded model
//! - [`ModelLoader`] turns a model id into a provider ([`FastEmbedLoader`] by default)
//! - [`EmbeddingGateway`] caches providers per model id and encodes in batches
//!   with progress reporting

mod gateway;
mod provider;

pub use gateway::{EmbeddingGateway, EMBED_PROGRESS_OFFSET};
pub use provider::{
    EmbeddingError, EmbeddingProvider, FastEmbedLoader, FastEmbedProvider, ModelLoader,
    SUPPORTED_MODELS,
};
