/// Process-wide model cache and batched encoding
use super::{EmbeddingError, EmbeddingProvider, ModelLoader};
use crate::error::{KbError, Result};
use ahash::AHashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Share of the per-document progress reserved for extraction and chunking
pub const EMBED_PROGRESS_OFFSET: f32 = 10.0;

/// Embedding gateway
///
/// Resolves each distinct model id once and keeps the handle for the lifetime
/// of the gateway. A model that fails to resolve is replaced by the fallback
/// model, and the fallback handle is cached under the requested id so the
/// failure is logged only once.
pub struct EmbeddingGateway {
    loader: Arc<dyn ModelLoader>,
    fallback_model: String,
    batch_size: usize,
    models: RwLock<AHashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl EmbeddingGateway {
    pub fn new(loader: Arc<dyn ModelLoader>, fallback_model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            loader,
            fallback_model: fallback_model.into(),
            batch_size: batch_size.max(1),
            models: RwLock::new(AHashMap::new()),
        }
    }

    /// Resolve a model handle, loading it on first use
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        if let Some(provider) = self
            .models
            .read()
            .map_err(|_| KbError::poisoned("model cache"))?
            .get(model_id)
        {
            return Ok(provider.clone());
        }

        let provider = match self.loader.load(model_id) {
            Ok(provider) => provider,
            Err(e) if model_id != self.fallback_model => {
                warn!(
                    "Failed to load embedding model '{}': {}. Falling back to '{}'",
                    model_id, e, self.fallback_model
                );
                self.resolve(&self.fallback_model)
                    .map_err(|fallback_err| KbError::ModelResolution {
                        model: model_id.to_string(),
                        message: format!("{}; fallback also failed: {}", e, fallback_err),
                    })?
            }
            Err(e) => {
                return Err(KbError::ModelResolution {
                    model: model_id.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let mut models = self
            .models
            .write()
            .map_err(|_| KbError::poisoned("model cache"))?;
        // Another caller may have raced us here; keep the first handle.
        let provider = models
            .entry(model_id.to_string())
            .or_insert(provider)
            .clone();

        info!(
            "Embedding model '{}' ready ({} -> {}D)",
            model_id,
            provider.model_name(),
            provider.dimension()
        );
        Ok(provider)
    }

    /// Encode texts in fixed-size batches.
    ///
    /// After each batch, `progress` receives `10 + 90 × processed / total`.
    pub fn embed(
        &self,
        texts: &[String],
        model_id: &str,
        progress: Option<&dyn Fn(f32)>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.resolve(model_id)?;
        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);

        for batch in texts.chunks(self.batch_size) {
            let embeddings = provider.embed_batch(batch)?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Embedding count mismatch: expected {}, got {}",
                    batch.len(),
                    embeddings.len()
                ))
                .into());
            }
            vectors.extend(embeddings);

            let pct = EMBED_PROGRESS_OFFSET
                + (100.0 - EMBED_PROGRESS_OFFSET) * vectors.len() as f32 / total as f32;
            debug!("Embedded {}/{} texts ({:.1}%)", vectors.len(), total, pct);
            if let Some(report) = progress {
                report(pct);
            }
        }

        Ok(vectors)
    }

    /// Encode a single query string
    pub fn embed_query(&self, query: &str, model_id: &str) -> Result<Vec<f32>> {
        let provider = self.resolve(model_id)?;
        Ok(provider.embed(query)?)
    }

    /// Model ids currently held in the cache
    pub fn cached_models(&self) -> Vec<String> {
        match self.models.read() {
            Ok(models) => {
                let mut ids: Vec<String> = models.keys().cloned().collect();
                ids.sort();
                ids
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedProvider {
        name: String,
        dim: usize,
    }

    impl EmbeddingProvider for FixedProvider {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0; self.dim])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0; self.dim]).collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn model_name(&self) -> &str {
            &self.name
        }
    }

    /// Loads only "good-model" and "fallback"; counts calls
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModelLoader for CountingLoader {
        fn load(
            &self,
            model_id: &str,
        ) -> std::result::Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match model_id {
                "good-model" => Ok(Arc::new(FixedProvider {
                    name: model_id.to_string(),
                    dim: 8,
                })),
                "fallback" => Ok(Arc::new(FixedProvider {
                    name: model_id.to_string(),
                    dim: 4,
                })),
                other => Err(EmbeddingError::UnsupportedModel(other.to_string())),
            }
        }
    }

    fn gateway(batch_size: usize) -> (EmbeddingGateway, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        (
            EmbeddingGateway::new(loader.clone(), "fallback", batch_size),
            loader,
        )
    }

    #[test]
    fn test_models_cached_per_id() {
        let (gateway, loader) = gateway(32);
        gateway.resolve("good-model").unwrap();
        gateway.resolve("good-model").unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.cached_models(), vec!["good-model".to_string()]);
    }

    #[test]
    fn test_fallback_on_resolution_failure() {
        let (gateway, loader) = gateway(32);
        let provider = gateway.resolve("missing-model").unwrap();
        assert_eq!(provider.model_name(), "fallback");
        assert_eq!(provider.dimension(), 4);

        // Second request is served from cache
        gateway.resolve("missing-model").unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fallback_failure_is_reported() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let gateway = EmbeddingGateway::new(loader, "also-missing", 32);
        let result = gateway.resolve("missing-model");
        assert!(matches!(result, Err(KbError::ModelResolution { .. })));
    }

    #[test]
    fn test_progress_per_batch() {
        let (gateway, _) = gateway(32);
        let texts: Vec<String> = (0..70).map(|i| format!("text {}", i)).collect();
        let reports = Mutex::new(Vec::new());

        let report = |pct: f32| reports.lock().unwrap().push(pct);
        let vectors = gateway.embed(&texts, "good-model", Some(&report)).unwrap();

        assert_eq!(vectors.len(), 70);
        let reports = reports.into_inner().unwrap();
        assert_eq!(reports.len(), 3);
        assert!((reports[0] - (10.0 + 90.0 * 32.0 / 70.0)).abs() < 1e-4);
        assert!((reports[2] - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_input() {
        let (gateway, loader) = gateway(32);
        assert!(gateway.embed(&[], "good-model", None).unwrap().is_empty());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }
}
