//! Knowledge base service
//!
//! [`KnowledgeBaseService`] owns every piece of shared state (catalog, vector
//! collections, model cache, lexical-index cache, reindex registry) and is the
//! only entry point the CLI and integration tests use. It is cheap to clone.
//!
//! Writes register with the reindex orchestrator first and fail with
//! [`KbError::KnowledgeBaseBusy`] while a reindex runs. Searches are never
//! blocked by a reindex, only by the short swap step.

use crate::config::{Config, ConfigValidator};
use crate::embedding::{EmbeddingGateway, FastEmbedLoader, ModelLoader};
use crate::error::{KbError, Result};
use crate::extract::{FileType, PlainTextExtractor, TextExtractor};
use crate::indexer::Indexer;
use crate::knowledge_base::{
    validate_description, validate_name, Catalog, Document, KbStats, KnowledgeBase,
    KnowledgeBaseConfig, KnowledgeBaseConfigUpdate,
};
use crate::reindex::{ReindexHandle, ReindexOrchestrator, ReindexStatus, Reindexer, StartOutcome};
use crate::retrieval::{candidate_count, fuse, SearchResponse, SearchType, SimilarDocument};
use crate::storage::StorageManager;
use crate::vector::{SqliteVectorStore, VectorCollection, VectorRecord, VectorStore};
use ahash::AHashSet;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError};
use tracing::{debug, error, info, warn};

pub const MAX_QUERY_CHARS: usize = 1000;
pub const MAX_BATCH_QUERIES: usize = 10;
pub const MAX_SIMILAR_LIMIT: usize = 20;

/// Outcome of a configuration update
#[derive(Debug, Clone)]
pub struct ConfigureResult {
    pub knowledge_base: KnowledgeBase,
    /// The new settings only take effect for existing passages after a reindex
    pub reindex_required: bool,
}

struct ServiceInner {
    config: Config,
    max_file_size: u64,
    storage: StorageManager,
    catalog: Catalog,
    indexer: Indexer,
    reindex: ReindexOrchestrator,
}

#[derive(Clone)]
pub struct KnowledgeBaseService {
    inner: Arc<ServiceInner>,
}

impl KnowledgeBaseService {
    /// Open the service with the FastEmbed backend and the plain-text extractor
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(
            config,
            Arc::new(FastEmbedLoader),
            Arc::new(PlainTextExtractor::new()),
        )
    }

    /// Open with the SQLite vector store and custom model/extraction backends
    pub fn open_with(
        config: Config,
        loader: Arc<dyn ModelLoader>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let storage = StorageManager::new(config.data_dir())?;
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(storage.database.clone()));
        Self::build(config, storage, store, loader, extractor)
    }

    /// Open with an explicit vector store
    pub fn with_store(
        config: Config,
        store: Arc<dyn VectorStore>,
        loader: Arc<dyn ModelLoader>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let storage = StorageManager::new(config.data_dir())?;
        Self::build(config, storage, store, loader, extractor)
    }

    fn build(
        config: Config,
        storage: StorageManager,
        store: Arc<dyn VectorStore>,
        loader: Arc<dyn ModelLoader>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        ConfigValidator::validate(&config)?;
        let max_file_size = config.max_file_size_bytes()?;

        let collections = VectorCollection::new(
            store,
            config.reindex.temp_suffix.clone(),
            config.reindex.copy_batch_size,
        );
        let gateway = EmbeddingGateway::new(
            loader,
            config.embedding.fallback_model.clone(),
            config.embedding.batch_size,
        );
        let indexer = Indexer::new(collections, gateway, extractor);
        let catalog = Catalog::new(storage.database.clone());

        let service = Self {
            inner: Arc::new(ServiceInner {
                config,
                max_file_size,
                storage,
                catalog,
                indexer,
                reindex: ReindexOrchestrator::new(),
            }),
        };
        service.recover()?;
        info!(
            "Knowledge base service ready at {}",
            service.inner.storage.base_path().display()
        );
        Ok(service)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    fn collections(&self) -> &VectorCollection {
        self.inner.indexer.collections()
    }

    /// Resolve collections left behind by an interrupted reindex
    fn recover(&self) -> Result<()> {
        let collections = self.collections();
        for kb in self.inner.catalog.list_kbs()? {
            let production = collections.production_name(&kb.id);
            let temp = collections.temp_name(&kb.id);
            if !collections.exists(&temp)? {
                continue;
            }

            if collections.exists(&production)? {
                warn!("Discarding unfinished reindex of {} ({})", kb.name, temp);
                collections.delete(&temp)?;
            } else {
                warn!(
                    "Completing interrupted swap for {}: renaming {} to {}",
                    kb.name, temp, production
                );
                collections.copy_all(&temp, &production)?;
                self.inner
                    .catalog
                    .set_indexed_model(&kb.id, &kb.config.embedding_model)?;
            }
        }
        Ok(())
    }

    // Knowledge bases

    pub fn create_kb(&self, name: &str, description: Option<&str>) -> Result<KnowledgeBase> {
        let name = validate_name(name)?;
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        if let Some(description) = description {
            validate_description(description)?;
        }

        let config = KnowledgeBaseConfig::from_defaults(&self.inner.config);
        config.validate()?;

        let kb = KnowledgeBase {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description: description.map(str::to_string),
            created_at: Utc::now(),
            indexed_model: config.embedding_model.clone(),
            config,
            file_count: 0,
        };
        self.inner.catalog.insert_kb(&kb)?;

        let production = self.collections().production_name(&kb.id);
        if let Err(e) = self.collections().create(&production) {
            warn!("Rolling back knowledge base {}: {}", kb.name, e);
            self.inner.catalog.delete_kb(&kb.id)?;
            return Err(e);
        }

        info!("Created knowledge base '{}' ({})", kb.name, kb.id);
        Ok(kb)
    }

    pub fn list_kbs(&self) -> Result<Vec<KnowledgeBase>> {
        self.inner.catalog.list_kbs()
    }

    pub fn get_kb(&self, kb_id: &str) -> Result<KnowledgeBase> {
        self.inner.catalog.get_kb(kb_id)
    }

    pub fn find_kb_by_name(&self, name: &str) -> Result<Option<KnowledgeBase>> {
        self.inner.catalog.find_kb_by_name(name)
    }

    /// Rename and/or re-describe a knowledge base. An empty description clears it.
    pub fn update_kb(
        &self,
        kb_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<KnowledgeBase> {
        let _guard = self.inner.reindex.begin_mutation(kb_id)?;
        self.inner.catalog.get_kb(kb_id)?;

        let name = name.map(validate_name).transpose()?;
        let description = description.map(str::trim);
        if let Some(description) = description {
            validate_description(description)?;
        }

        self.inner
            .catalog
            .update_kb_details(kb_id, name.as_deref(), description)
    }

    /// Apply a partial settings update
    pub fn configure_kb(
        &self,
        kb_id: &str,
        update: &KnowledgeBaseConfigUpdate,
    ) -> Result<ConfigureResult> {
        let _guard = self.inner.reindex.begin_mutation(kb_id)?;
        let kb = self.inner.catalog.get_kb(kb_id)?;

        let next = kb.config.apply(update)?;
        self.inner.catalog.update_config(kb_id, &next)?;

        let reindex_required =
            kb.config.needs_reindex(&next) || next.embedding_model != kb.indexed_model;
        if reindex_required {
            info!(
                "Settings of '{}' changed; reindex to apply them to existing documents",
                kb.name
            );
        }

        Ok(ConfigureResult {
            knowledge_base: self.inner.catalog.get_kb(kb_id)?,
            reindex_required,
        })
    }

    /// Delete a knowledge base with its collections, documents and files.
    /// Returns false if it does not exist.
    pub fn delete_kb(&self, kb_id: &str) -> Result<bool> {
        let guard = self.inner.reindex.begin_mutation(kb_id)?;
        let kb = match self.inner.catalog.get_kb(kb_id) {
            Ok(kb) => kb,
            Err(KbError::KnowledgeBaseNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let collections = self.collections();
        collections.delete(&collections.production_name(kb_id))?;
        collections.delete(&collections.temp_name(kb_id))?;
        self.inner.catalog.delete_kb(kb_id)?;
        self.inner.storage.remove_files_dir(kb_id)?;
        self.inner.indexer.lexical().remove(kb_id);

        drop(guard);
        self.inner.reindex.forget(kb_id);
        info!("Deleted knowledge base '{}' ({})", kb.name, kb_id);
        Ok(true)
    }

    pub fn stats(&self, kb_id: &str) -> Result<KbStats> {
        let kb = self.inner.catalog.get_kb(kb_id)?;
        let documents = self.inner.catalog.list_documents(kb_id)?;

        let mut file_types = BTreeMap::new();
        for doc in &documents {
            *file_types.entry(doc.file_type.to_string()).or_insert(0) += 1;
        }

        let production = self.collections().production_name(kb_id);
        let searchable = self.collections().exists(&production)?;
        let indexed_passages = if searchable {
            self.collections().count(&production)?
        } else {
            0
        };

        Ok(KbStats {
            kb_id: kb.id,
            name: kb.name,
            file_count: documents.len(),
            total_size: documents.iter().map(|d| d.file_size).sum(),
            total_chunks: documents.iter().map(|d| d.chunk_count).sum(),
            file_types,
            created_at: kb.created_at,
            indexed_passages,
            searchable,
            indexed_model: kb.indexed_model,
            reindexing: self.inner.reindex.is_locked(kb_id),
        })
    }

    // Documents

    /// Store, extract, chunk, embed and index an uploaded file.
    ///
    /// Any failure after the file was stored removes the stored copy, its
    /// metadata and any passages already written.
    pub fn add_file(&self, kb_id: &str, source: &Path, filename: Option<&str>) -> Result<Document> {
        let _guard = self.inner.reindex.begin_mutation(kb_id)?;
        let kb = self.inner.catalog.get_kb(kb_id)?;

        let filename = match filename {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    KbError::InvalidInput(format!("No filename in {}", source.display()))
                })?,
        };

        let size = std::fs::metadata(source)
            .map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to read {}", source.display()),
            })?
            .len();
        if size == 0 {
            return Err(KbError::EmptyFile {
                path: source.to_path_buf(),
            });
        }
        if size > self.inner.max_file_size {
            return Err(KbError::FileTooLarge {
                size,
                max: self.inner.max_file_size,
            });
        }

        let stored = self.inner.storage.store_file(kb_id, source, &filename)?;
        let mut doc = Document {
            id: uuid::Uuid::new_v4().to_string(),
            kb_id: kb_id.to_string(),
            file_type: FileType::from_filename(&filename),
            filename,
            file_path: stored,
            file_size: size,
            chunk_count: 0,
            processed_at: Utc::now(),
        };

        match self.index_new_document(&kb, &mut doc) {
            Ok(()) => {
                info!(
                    "Added {} to '{}' ({} passages)",
                    doc.filename, kb.name, doc.chunk_count
                );
                Ok(doc)
            }
            Err(e) => {
                warn!("Upload of {} failed, rolling back: {}", doc.filename, e);
                self.rollback_upload(&doc);
                Err(e)
            }
        }
    }

    fn index_new_document(&self, kb: &KnowledgeBase, doc: &mut Document) -> Result<()> {
        let passages = self.inner.indexer.prepare(doc, &kb.config.chunking)?;
        let records = self
            .inner
            .indexer
            .embed(doc, &passages, &kb.indexed_model, None)?;
        doc.chunk_count = records.len();

        let production = self.collections().production_name(&kb.id);
        self.collections().add(&production, &records)?;
        self.inner.indexer.lexical().invalidate(&kb.id);
        self.inner.catalog.insert_document(doc)?;
        Ok(())
    }

    fn rollback_upload(&self, doc: &Document) {
        let production = self.collections().production_name(&doc.kb_id);
        if let Ok(true) = self.collections().exists(&production) {
            if let Err(e) = self.collections().remove_by_document(&production, &doc.id) {
                warn!("Rollback could not remove passages of {}: {}", doc.id, e);
            }
        }
        self.inner.indexer.lexical().invalidate(&doc.kb_id);
        if let Err(e) = self.inner.catalog.delete_document(&doc.id) {
            warn!("Rollback could not remove metadata of {}: {}", doc.id, e);
        }
        if let Err(e) = self.inner.storage.remove_file(&doc.file_path) {
            warn!("Rollback could not remove {}: {}", doc.file_path.display(), e);
        }
    }

    /// Replace the passages of a document with pre-chunked text.
    ///
    /// Returns false without touching the index when `chunks` is empty.
    pub fn index_document(&self, kb_id: &str, document_id: &str, chunks: &[String]) -> Result<bool> {
        let _guard = self.inner.reindex.begin_mutation(kb_id)?;
        let kb = self.inner.catalog.get_kb(kb_id)?;
        let doc = self.document_in(kb_id, document_id)?;

        if chunks.is_empty() {
            debug!("No chunks supplied for {}", document_id);
            return Ok(false);
        }

        let records = self
            .inner
            .indexer
            .embed(&doc, chunks, &kb.indexed_model, None)?;
        self.replace_passages(kb_id, document_id, &records)?;
        self.inner
            .catalog
            .set_chunk_counts(&[(document_id.to_string(), records.len())])?;
        Ok(true)
    }

    /// Swap the production passages of one document for `records`.
    ///
    /// The width is checked before anything is removed. If the insert still
    /// fails, the previous passages are put back. Returns the number of
    /// passages replaced.
    fn replace_passages(
        &self,
        kb_id: &str,
        document_id: &str,
        records: &[VectorRecord],
    ) -> Result<usize> {
        let collections = self.collections();
        let production = collections.production_name(kb_id);
        if let Some(first) = records.first() {
            collections.check_dimension(&production, first.embedding.len())?;
        }

        let previous = collections.passages_for_document(&production, document_id)?;
        let removed = collections.remove_by_document(&production, document_id)?;
        let result = collections.add(&production, records);
        self.inner.indexer.lexical().invalidate(kb_id);

        if let Err(e) = result {
            warn!(
                "Replacing passages of {} failed, restoring {} previous: {}",
                document_id,
                previous.len(),
                e
            );
            if let Err(restore) = collections.add(&production, &previous) {
                error!(
                    "Could not restore passages of {} in {}: {}",
                    document_id, production, restore
                );
            }
            return Err(e);
        }
        Ok(removed)
    }

    /// Remove a document, its passages and its stored file.
    /// Returns false if the document does not exist.
    pub fn remove_document(&self, kb_id: &str, document_id: &str) -> Result<bool> {
        let _guard = self.inner.reindex.begin_mutation(kb_id)?;
        let doc = match self.document_in(kb_id, document_id) {
            Ok(doc) => doc,
            Err(KbError::DocumentNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let production = self.collections().production_name(kb_id);
        if self.collections().exists(&production)? {
            self.collections().remove_by_document(&production, document_id)?;
        }
        self.inner.indexer.lexical().invalidate(kb_id);
        self.inner.catalog.delete_document(document_id)?;
        self.inner.storage.remove_file(&doc.file_path)?;

        info!("Removed {} from knowledge base {}", doc.filename, kb_id);
        Ok(true)
    }

    /// Re-extract and re-chunk one document with the current settings
    pub fn reprocess_document(&self, kb_id: &str, document_id: &str) -> Result<Document> {
        let _guard = self.inner.reindex.begin_mutation(kb_id)?;
        let kb = self.inner.catalog.get_kb(kb_id)?;
        let doc = self.document_in(kb_id, document_id)?;

        let passages = self.inner.indexer.prepare(&doc, &kb.config.chunking)?;
        let records = self
            .inner
            .indexer
            .embed(&doc, &passages, &kb.indexed_model, None)?;

        let removed = self.replace_passages(kb_id, document_id, &records)?;
        self.inner
            .catalog
            .set_chunk_counts(&[(document_id.to_string(), records.len())])?;

        info!(
            "Reprocessed {}: {} -> {} passages",
            doc.filename,
            removed,
            records.len()
        );
        self.inner.catalog.get_document(document_id)
    }

    /// Documents of a knowledge base, newest first
    pub fn list_documents(&self, kb_id: &str) -> Result<Vec<Document>> {
        self.inner.catalog.get_kb(kb_id)?;
        self.inner.catalog.list_documents(kb_id)
    }

    pub fn get_document(&self, kb_id: &str, document_id: &str) -> Result<Document> {
        self.document_in(kb_id, document_id)
    }

    fn document_in(&self, kb_id: &str, document_id: &str) -> Result<Document> {
        let doc = self.inner.catalog.get_document(document_id)?;
        if doc.kb_id != kb_id {
            return Err(KbError::DocumentNotFound {
                id: document_id.to_string(),
            });
        }
        Ok(doc)
    }

    // Search

    /// Rank passages of the production collection against `query`.
    ///
    /// `override_hybrid` replaces the knowledge base's hybrid setting for
    /// this request only.
    pub fn search(
        &self,
        kb_id: &str,
        query: &str,
        limit: Option<usize>,
        override_hybrid: Option<bool>,
    ) -> Result<SearchResponse> {
        let query = validate_query(query)?;
        let limit = self.validate_limit(limit)?;

        let gate = self.inner.reindex.swap_gate(kb_id)?;
        let _shared = gate.read().unwrap_or_else(PoisonError::into_inner);

        let kb = self.inner.catalog.get_kb(kb_id)?;
        let collections = self.collections();
        let production = collections.production_name(kb_id);
        if !collections.exists(&production)? {
            return Err(KbError::CollectionMissing { name: production });
        }

        let settings = kb.config.search;
        let hybrid = override_hybrid.unwrap_or(settings.hybrid_search);
        let embedding = self
            .inner
            .indexer
            .gateway()
            .embed_query(query, &kb.indexed_model)?;

        let search = &self.inner.config.search;
        let k = candidate_count(
            limit,
            hybrid,
            search.overfetch_multiplier,
            search.overfetch_cap,
        );
        let candidates = collections.query(&production, &embedding, k)?;

        let lexical = if hybrid {
            self.inner
                .indexer
                .lexical()
                .get_or_build(kb_id, settings.bm25_k1, settings.bm25_b, || {
                    collections.texts(&production)
                })?
                .map(|index| index.scores_by_text(query))
        } else {
            None
        };

        let results = fuse(candidates, lexical.as_ref(), settings.hybrid_alpha, limit);
        debug!(
            "Search '{}' in {} returned {} results ({} candidates)",
            query,
            kb_id,
            results.len(),
            k
        );

        Ok(SearchResponse {
            kb_id: kb_id.to_string(),
            query: query.to_string(),
            search_type: if hybrid {
                SearchType::Hybrid
            } else {
                SearchType::Vector
            },
            total_results: results.len(),
            results,
        })
    }

    /// Run up to ten queries with the same settings
    pub fn batch_search(
        &self,
        kb_id: &str,
        queries: &[String],
        limit: Option<usize>,
        override_hybrid: Option<bool>,
    ) -> Result<Vec<SearchResponse>> {
        if queries.is_empty() || queries.len() > MAX_BATCH_QUERIES {
            return Err(KbError::InvalidInput(format!(
                "Batch search takes 1 to {} queries",
                MAX_BATCH_QUERIES
            )));
        }
        // Validate everything before running anything
        for query in queries {
            validate_query(query)?;
        }
        self.validate_limit(limit)?;

        queries
            .iter()
            .map(|query| self.search(kb_id, query, limit, override_hybrid))
            .collect()
    }

    /// Documents whose passages are closest to the first passage of
    /// `document_id`, one entry per document, source excluded
    pub fn find_similar(
        &self,
        kb_id: &str,
        document_id: &str,
        limit: usize,
    ) -> Result<Vec<SimilarDocument>> {
        if limit == 0 || limit > MAX_SIMILAR_LIMIT {
            return Err(KbError::InvalidInput(format!(
                "Limit must be between 1 and {}",
                MAX_SIMILAR_LIMIT
            )));
        }
        self.inner.catalog.get_kb(kb_id)?;
        self.document_in(kb_id, document_id)?;

        let gate = self.inner.reindex.swap_gate(kb_id)?;
        let _shared = gate.read().unwrap_or_else(PoisonError::into_inner);

        let collections = self.collections();
        let production = collections.production_name(kb_id);
        if !collections.exists(&production)? {
            return Err(KbError::CollectionMissing { name: production });
        }

        let passages = collections.passages_for_document(&production, document_id)?;
        let Some(first) = passages.first() else {
            debug!("Document {} has no passages", document_id);
            return Ok(Vec::new());
        };

        // Every passage of the source may outrank the first other document
        let candidates =
            collections.query(&production, &first.embedding, limit + passages.len())?;

        let mut seen = AHashSet::new();
        let mut similar = Vec::with_capacity(limit);
        for candidate in candidates {
            let doc_id = &candidate.metadata.document_id;
            if doc_id == document_id || !seen.insert(doc_id.clone()) {
                continue;
            }
            similar.push(SimilarDocument {
                document_id: candidate.metadata.document_id,
                filename: candidate.metadata.filename,
                file_type: candidate.metadata.file_type,
                similarity_score: candidate.similarity,
                preview: candidate.text,
            });
            if similar.len() >= limit {
                break;
            }
        }
        Ok(similar)
    }

    fn validate_limit(&self, limit: Option<usize>) -> Result<usize> {
        let search = &self.inner.config.search;
        let limit = limit.unwrap_or(search.default_limit);
        if limit == 0 || limit > search.max_limit {
            return Err(KbError::InvalidQuery(format!(
                "Limit must be between 1 and {}",
                search.max_limit
            )));
        }
        Ok(limit)
    }

    // Reindex

    /// Start rebuilding the knowledge base in the background.
    ///
    /// Must be called from within a tokio runtime. A request while a job is
    /// running returns that job's status and spawns nothing.
    pub fn start_reindex(&self, kb_id: &str) -> Result<ReindexHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| KbError::Other(anyhow::anyhow!("No async runtime for reindex: {}", e)))?;
        self.inner.catalog.get_kb(kb_id)?;
        let total = self.inner.catalog.list_documents(kb_id)?.len();

        let job = match self.inner.reindex.try_start(kb_id, total)? {
            StartOutcome::AlreadyRunning(status) => {
                debug!("Reindex of {} already running", kb_id);
                return Ok(ReindexHandle { status, task: None });
            }
            StartOutcome::Started(job) => job,
        };

        let status = job.snapshot();
        let inner = self.inner.clone();
        let kb_id = kb_id.to_string();
        let task = runtime.spawn_blocking(move || {
            let reindexer = Reindexer {
                orchestrator: &inner.reindex,
                catalog: &inner.catalog,
                indexer: &inner.indexer,
            };
            reindexer.run(&kb_id, &job)
        });

        Ok(ReindexHandle {
            status,
            task: Some(task),
        })
    }

    pub fn reindex_progress(&self, kb_id: &str) -> ReindexStatus {
        self.inner.reindex.status(kb_id)
    }

    /// Request cancellation; false if nothing is cancellable
    pub fn cancel_reindex(&self, kb_id: &str) -> bool {
        self.inner.reindex.cancel(kb_id)
    }

    pub fn is_busy(&self, kb_id: &str) -> bool {
        self.inner.reindex.is_locked(kb_id)
    }
}

fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    let len = query.chars().count();
    if len == 0 {
        return Err(KbError::InvalidQuery("Query cannot be empty".to_string()));
    }
    if len > MAX_QUERY_CHARS {
        return Err(KbError::InvalidQuery(format!(
            "Query must be at most {} characters",
            MAX_QUERY_CHARS
        )));
    }
    Ok(query)
}
