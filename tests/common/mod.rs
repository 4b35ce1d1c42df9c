//! Shared fixtures: a deterministic embedder, fault-injecting store and
//! extractor doubles, and a service over a temp dir
#![allow(dead_code)]

use kbindex::config::Config;
use kbindex::embedding::{EmbeddingError, EmbeddingProvider, ModelLoader};
use kbindex::extract::{FileType, PlainTextExtractor, TextExtractor};
use kbindex::lexical::tokenize;
use kbindex::vector::{MemoryVectorStore, VectorHit, VectorRecord, VectorStore};
use kbindex::{KbError, KnowledgeBaseService};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const BASE_DIMENSION: usize = 32;
/// Model id the test loader serves with a wider embedding
pub const WIDE_MODEL: &str = "wide-model";

/// Hashed bag-of-words embeddings: texts sharing words are close
pub struct HashEmbedder {
    name: String,
    dimension: usize,
    batch_delay: Duration,
    batches: Arc<AtomicUsize>,
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl HashEmbedder {
    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            v[(fnv1a(token) % self.dimension as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if !self.batch_delay.is_zero() {
            std::thread::sleep(self.batch_delay);
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Serves [`HashEmbedder`]s; ids starting with `missing` fail to load
#[derive(Clone, Default)]
pub struct TestLoader {
    pub batch_delay: Duration,
    pub batches: Arc<AtomicUsize>,
}

impl ModelLoader for TestLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
        if model_id.starts_with("missing") {
            return Err(EmbeddingError::UnsupportedModel(model_id.to_string()));
        }
        let dimension = if model_id == WIDE_MODEL {
            BASE_DIMENSION * 2
        } else {
            BASE_DIMENSION
        };
        Ok(Arc::new(HashEmbedder {
            name: model_id.to_string(),
            dimension,
            batch_delay: self.batch_delay,
            batches: self.batches.clone(),
        }))
    }
}

struct AddFault {
    collection: String,
    /// Adds still allowed through before failures start
    skip: usize,
    /// Adds left to reject once failures start
    failures: usize,
}

/// In-memory store whose `add` into one collection can be made to fail
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryVectorStore,
    fault: Mutex<Option<AddFault>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `succeed` more adds into `collection` through, then fail the rest
    pub fn fail_adds_to(&self, collection: &str, succeed: usize) {
        self.set_fault(collection, succeed, usize::MAX);
    }

    /// Reject only the next add into `collection`
    pub fn fail_next_add(&self, collection: &str) {
        self.set_fault(collection, 0, 1);
    }

    pub fn clear_faults(&self) {
        *self.fault.lock().unwrap() = None;
    }

    fn set_fault(&self, collection: &str, skip: usize, failures: usize) {
        *self.fault.lock().unwrap() = Some(AddFault {
            collection: collection.to_string(),
            skip,
            failures,
        });
    }

    fn reject(&self, name: &str) -> bool {
        let mut fault = self.fault.lock().unwrap();
        let Some(active) = fault.as_mut().filter(|f| f.collection == name) else {
            return false;
        };
        if active.skip > 0 {
            active.skip -= 1;
            return false;
        }
        active.failures -= 1;
        if active.failures == 0 {
            *fault = None;
        }
        true
    }
}

impl VectorStore for FaultyStore {
    fn create_collection(&self, name: &str) -> Result<(), KbError> {
        self.inner.create_collection(name)
    }

    fn delete_collection(&self, name: &str) -> Result<bool, KbError> {
        self.inner.delete_collection(name)
    }

    fn has_collection(&self, name: &str) -> Result<bool, KbError> {
        self.inner.has_collection(name)
    }

    fn list_collections(&self) -> Result<Vec<String>, KbError> {
        self.inner.list_collections()
    }

    fn add(&self, name: &str, records: &[VectorRecord]) -> Result<(), KbError> {
        if self.reject(name) {
            return Err(KbError::Other(anyhow::anyhow!("write to {} rejected", name)));
        }
        self.inner.add(name, records)
    }

    fn ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>, KbError> {
        self.inner.ids_for_document(name, document_id)
    }

    fn get_by_document(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<Vec<VectorRecord>, KbError> {
        self.inner.get_by_document(name, document_id)
    }

    fn delete_ids(&self, name: &str, ids: &[String]) -> Result<usize, KbError> {
        self.inner.delete_ids(name, ids)
    }

    fn get_page(
        &self,
        name: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<VectorRecord>, KbError> {
        self.inner.get_page(name, offset, limit)
    }

    fn texts(&self, name: &str) -> Result<Vec<String>, KbError> {
        self.inner.texts(name)
    }

    fn query(&self, name: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>, KbError> {
        self.inner.query(name, embedding, k)
    }

    fn count(&self, name: &str) -> Result<usize, KbError> {
        self.inner.count(name)
    }

    fn dimension(&self, name: &str) -> Result<Option<usize>, KbError> {
        self.inner.dimension(name)
    }
}

/// Plain-text extractor that panics once armed
#[derive(Clone)]
pub struct TestExtractor {
    inner: Arc<PlainTextExtractor>,
    panic_armed: Arc<AtomicBool>,
}

impl TestExtractor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PlainTextExtractor::new()),
            panic_armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_panic(&self, armed: bool) {
        self.panic_armed.store(armed, Ordering::SeqCst);
    }
}

impl TextExtractor for TestExtractor {
    fn extract(&self, path: &Path, file_type: FileType) -> Result<String, KbError> {
        if self.panic_armed.load(Ordering::SeqCst) {
            panic!("extractor crashed on {}", path.display());
        }
        self.inner.extract(path, file_type)
    }
}

pub struct TestEnv {
    pub service: KnowledgeBaseService,
    pub store: Arc<FaultyStore>,
    pub loader: TestLoader,
    pub extractor: TestExtractor,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every embedding batch sleeps for `delay`, keeping reindex jobs observable
    pub fn with_delay(delay: Duration) -> Self {
        Self::build(delay, |_| {})
    }

    pub fn build(delay: Duration, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let store = Arc::new(FaultyStore::new());
        let loader = TestLoader {
            batch_delay: delay,
            batches: Arc::new(AtomicUsize::new(0)),
        };
        let extractor = TestExtractor::new();
        let service = KnowledgeBaseService::with_store(
            config,
            store.clone(),
            Arc::new(loader.clone()),
            Arc::new(extractor.clone()),
        )
        .unwrap();

        Self {
            service,
            store,
            loader,
            extractor,
            dir,
        }
    }

    /// Open a second service over the same data directory and vector store
    pub fn reopen(&self) -> KnowledgeBaseService {
        KnowledgeBaseService::with_store(
            test_config(self.dir.path()),
            self.store.clone(),
            Arc::new(self.loader.clone()),
            Arc::new(self.extractor.clone()),
        )
        .unwrap()
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.path().join("data").join("kbindex.sqlite")
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        write_file(&self.dir.path().join("uploads"), name, content)
    }

    pub fn files_dir(&self, kb_id: &str) -> PathBuf {
        self.dir.path().join("data").join("files").join(kb_id)
    }
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = root.join("data");
    config
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// `sentences` sentences of thirteen words each, all about `topic`
pub fn document_text(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "The {topic} sentence number {i} describes how {topic} systems behave under load today."
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}
