//! Document indexing pipeline
//!
//! ```text
//! stored file -> TextExtractor -> chunk_text -> EmbeddingGateway -> VectorCollection
//! ```
//!
//! Shared by uploads, reprocessing and reindex jobs. The caller picks the
//! target collection; writes to a production collection must be followed by
//! a lexical-index invalidation for that knowledge base.

use crate::chunking::{chunk_text, ChunkingParams};
use crate::embedding::{EmbeddingGateway, EMBED_PROGRESS_OFFSET};
use crate::error::{KbError, Result};
use crate::extract::TextExtractor;
use crate::knowledge_base::Document;
use crate::lexical::LexicalIndexCache;
use crate::vector::{passage_id, PassageMetadata, VectorCollection, VectorRecord};
use std::sync::Arc;
use tracing::debug;

pub struct Indexer {
    collections: VectorCollection,
    gateway: EmbeddingGateway,
    extractor: Arc<dyn TextExtractor>,
    lexical: LexicalIndexCache,
}

impl Indexer {
    pub fn new(
        collections: VectorCollection,
        gateway: EmbeddingGateway,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            collections,
            gateway,
            extractor,
            lexical: LexicalIndexCache::new(),
        }
    }

    pub fn collections(&self) -> &VectorCollection {
        &self.collections
    }

    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    pub fn lexical(&self) -> &LexicalIndexCache {
        &self.lexical
    }

    /// Extract and chunk a stored document
    pub fn prepare(&self, doc: &Document, params: &ChunkingParams) -> Result<Vec<String>> {
        let text = self.extractor.extract(&doc.file_path, doc.file_type)?;
        if text.trim().is_empty() {
            return Err(KbError::ExtractionEmpty {
                file: doc.filename.clone(),
            });
        }

        let passages = chunk_text(&text, params);
        if passages.is_empty() {
            return Err(KbError::NoPassages {
                file: doc.filename.clone(),
            });
        }

        debug!(
            "Chunked {} into {} passages ({} chars)",
            doc.filename,
            passages.len(),
            text.len()
        );
        Ok(passages)
    }

    /// Embed passages into records carrying the document's metadata
    pub fn embed(
        &self,
        doc: &Document,
        passages: &[String],
        model: &str,
        progress: Option<&dyn Fn(f32)>,
    ) -> Result<Vec<VectorRecord>> {
        let embeddings = self.gateway.embed(passages, model, progress)?;
        let total = passages.len();

        Ok(passages
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (text, embedding))| VectorRecord {
                id: passage_id(&doc.id, index),
                embedding,
                text: text.clone(),
                metadata: PassageMetadata {
                    document_id: doc.id.clone(),
                    filename: doc.filename.clone(),
                    file_type: doc.file_type,
                    chunk_index: index,
                    total_chunks: total,
                },
            })
            .collect())
    }

    /// Extract, chunk, embed and add one document to `collection`.
    ///
    /// Reports `10` once chunking is done, then `10 + 90 × embedded / total`
    /// per embedding batch. Returns the number of passages written.
    pub fn index_document(
        &self,
        collection: &str,
        doc: &Document,
        params: &ChunkingParams,
        model: &str,
        progress: Option<&dyn Fn(f32)>,
    ) -> Result<usize> {
        let passages = self.prepare(doc, params)?;
        if let Some(report) = progress {
            report(EMBED_PROGRESS_OFFSET);
        }

        let records = self.embed(doc, &passages, model, progress)?;
        self.collections.add(collection, &records)?;
        Ok(records.len())
    }
}
