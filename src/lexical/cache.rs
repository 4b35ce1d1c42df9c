/// Per-knowledge-base lexical index cache
use super::LexicalIndex;
use crate::error::{KbError, Result};
use ahash::AHashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

struct Cached {
    k1: f32,
    b: f32,
    index: Option<Arc<LexicalIndex>>,
}

#[derive(Default)]
struct Slot {
    /// Bumped by every invalidation; a build started under an older
    /// generation is returned to its caller but not cached.
    generation: u64,
    cached: Option<Cached>,
}

/// Lazily built lexical indexes keyed by knowledge-base id
#[derive(Default)]
pub struct LexicalIndexCache {
    slots: RwLock<AHashMap<String, Slot>>,
}

impl LexicalIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached index, building it from `load` on a miss or when
    /// `k1`/`b` differ from the cached build. `Ok(None)` means the knowledge
    /// base has no passages.
    pub fn get_or_build<F>(
        &self,
        kb_id: &str,
        k1: f32,
        b: f32,
        load: F,
    ) -> Result<Option<Arc<LexicalIndex>>>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        let generation = {
            let slots = self
                .slots
                .read()
                .map_err(|_| KbError::poisoned("lexical index cache"))?;
            match slots.get(kb_id) {
                Some(slot) => {
                    if let Some(cached) = &slot.cached {
                        if cached.k1 == k1 && cached.b == b {
                            return Ok(cached.index.clone());
                        }
                    }
                    slot.generation
                }
                None => 0,
            }
        };

        let texts = load()?;
        let passages = texts.len();
        let index = LexicalIndex::build(texts, k1, b).map(Arc::new);
        debug!("Built lexical index for {} over {} passages", kb_id, passages);

        let mut slots = self
            .slots
            .write()
            .map_err(|_| KbError::poisoned("lexical index cache"))?;
        let slot = slots.entry(kb_id.to_string()).or_default();
        if slot.generation == generation {
            slot.cached = Some(Cached {
                k1,
                b,
                index: index.clone(),
            });
        }
        Ok(index)
    }

    /// Drop the cached index of one knowledge base
    pub fn invalidate(&self, kb_id: &str) {
        match self.slots.write() {
            Ok(mut slots) => {
                let slot = slots.entry(kb_id.to_string()).or_default();
                slot.generation += 1;
                slot.cached = None;
                debug!("Invalidated lexical index for {}", kb_id);
            }
            Err(poisoned) => {
                // Poisoned: drop every cached index
                poisoned.into_inner().clear();
            }
        }
    }

    /// Forget a knowledge base entirely
    pub fn remove(&self, kb_id: &str) {
        self.invalidate(kb_id);
        if let Ok(mut slots) = self.slots.write() {
            slots.remove(kb_id);
        }
    }

    pub fn is_cached(&self, kb_id: &str) -> bool {
        self.slots
            .read()
            .map(|slots| {
                slots
                    .get(kb_id)
                    .map(|slot| slot.cached.is_some())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}
