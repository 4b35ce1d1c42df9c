/// Collection-level policies over a [`VectorStore`]
use super::{PassageMetadata, VectorRecord, VectorStore};
use crate::error::{KbError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Production collection name for a knowledge base
pub fn production_collection_name(kb_id: &str) -> String {
    format!("kb_{}", kb_id)
}

/// Query match with the store's distance converted to a similarity score.
///
/// `similarity = 1 - distance`; with cosine distance this lies in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub id: String,
    pub text: String,
    pub metadata: PassageMetadata,
    pub similarity: f32,
}

/// Adapter applying naming, dimension and rename policies to a store
pub struct VectorCollection {
    store: Arc<dyn VectorStore>,
    temp_suffix: String,
    copy_batch_size: usize,
}

impl VectorCollection {
    pub fn new(store: Arc<dyn VectorStore>, temp_suffix: impl Into<String>, copy_batch_size: usize) -> Self {
        Self {
            store,
            temp_suffix: temp_suffix.into(),
            copy_batch_size: copy_batch_size.max(1),
        }
    }

    pub fn production_name(&self, kb_id: &str) -> String {
        production_collection_name(kb_id)
    }

    /// Name of the collection a reindex builds into
    pub fn temp_name(&self, kb_id: &str) -> String {
        format!("{}{}", production_collection_name(kb_id), self.temp_suffix)
    }

    pub fn create(&self, name: &str) -> Result<()> {
        self.store.create_collection(name)?;
        info!("Created collection {}", name);
        Ok(())
    }

    /// Delete a collection; deleting a missing collection returns false
    pub fn delete(&self, name: &str) -> Result<bool> {
        let deleted = self.store.delete_collection(name)?;
        if deleted {
            info!("Deleted collection {}", name);
        }
        Ok(deleted)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.store.has_collection(name)
    }

    pub fn count(&self, name: &str) -> Result<usize> {
        self.store.count(name)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list_collections()
    }

    /// Fail with `DimensionMismatch` when `width` differs from the
    /// collection's established dimension. A collection that was never
    /// written accepts any width.
    pub fn check_dimension(&self, name: &str, width: usize) -> Result<()> {
        match self.store.dimension(name)? {
            Some(expected) if expected != width => Err(KbError::DimensionMismatch {
                collection: name.to_string(),
                expected,
                actual: width,
            }),
            _ => Ok(()),
        }
    }

    /// Add passages, rejecting vectors whose width differs from the
    /// collection's established dimension or from each other.
    pub fn add(&self, name: &str, records: &[VectorRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        let expected = self
            .store
            .dimension(name)?
            .unwrap_or(first.embedding.len());
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != expected) {
            return Err(KbError::DimensionMismatch {
                collection: name.to_string(),
                expected,
                actual: bad.embedding.len(),
            });
        }

        self.store.add(name, records)?;
        debug!("Added {} passages to {}", records.len(), name);
        Ok(())
    }

    /// Remove every passage of a document. A document with no passages is a
    /// successful no-op.
    pub fn remove_by_document(&self, name: &str, document_id: &str) -> Result<usize> {
        let ids = self.store.ids_for_document(name, document_id)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_ids(name, &ids)?;
        debug!("Removed {} passages of {} from {}", removed, document_id, name);
        Ok(removed)
    }

    /// Passages of one document ordered by chunk index
    pub fn passages_for_document(&self, name: &str, document_id: &str) -> Result<Vec<VectorRecord>> {
        self.store.get_by_document(name, document_id)
    }

    pub fn texts(&self, name: &str) -> Result<Vec<String>> {
        self.store.texts(name)
    }

    /// Nearest `k` passages, most similar first
    pub fn query(&self, name: &str, embedding: &[f32], k: usize) -> Result<Vec<ScoredPassage>> {
        self.check_dimension(name, embedding.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = self.store.query(name, embedding, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| ScoredPassage {
                id: hit.id,
                text: hit.text,
                metadata: hit.metadata,
                similarity: 1.0 - hit.distance,
            })
            .collect())
    }

    /// Rename `src` to `dst` by copying.
    ///
    /// Reads the source in fixed-size batches, creates `dst`, re-inserts every
    /// batch, then deletes `src`. The rename is complete only once the source
    /// delete succeeds. A failure while inserting leaves both collections in
    /// place. An empty source is handled as create-then-delete.
    pub fn copy_all(&self, src: &str, dst: &str) -> Result<()> {
        if !self.store.has_collection(src)? {
            return Err(KbError::CollectionMissing {
                name: src.to_string(),
            });
        }

        let total = self.store.count(src)?;
        if total == 0 {
            self.store.create_collection(dst)?;
            self.store.delete_collection(src)?;
            info!("Renamed empty collection {} -> {}", src, dst);
            return Ok(());
        }

        let mut batches = Vec::with_capacity(total.div_ceil(self.copy_batch_size));
        let mut offset = 0;
        loop {
            let batch = self.store.get_page(src, offset, self.copy_batch_size)?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            batches.push(batch);
        }

        self.store.create_collection(dst)?;
        for (i, batch) in batches.iter().enumerate() {
            if let Err(e) = self.store.add(dst, batch) {
                warn!(
                    "Copy {} -> {} failed at batch {}; both collections kept: {}",
                    src, dst, i, e
                );
                return Err(e);
            }
        }

        self.store.delete_collection(src)?;
        info!("Renamed collection {} -> {} ({} passages)", src, dst, offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::test_support::record;
    use crate::vector::MemoryVectorStore;

    fn collection(batch: usize) -> (VectorCollection, Arc<MemoryVectorStore>) {
        let store = Arc::new(MemoryVectorStore::new());
        (VectorCollection::new(store.clone(), "_temp_reindex", batch), store)
    }

    #[test]
    fn test_names() {
        let (collections, _) = collection(1000);
        assert_eq!(collections.production_name("abc"), "kb_abc");
        assert_eq!(collections.temp_name("abc"), "kb_abc_temp_reindex");
    }

    #[test]
    fn test_dimension_policy() {
        let (collections, _) = collection(1000);
        collections.create("c").unwrap();
        collections.add("c", &[record("a", 0, 1, vec![1.0, 0.0])]).unwrap();

        let result = collections.add("c", &[record("b", 0, 1, vec![1.0, 0.0, 0.0])]);
        assert!(matches!(
            result,
            Err(KbError::DimensionMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));

        let mixed = [record("x", 0, 1, vec![1.0]), record("y", 0, 1, vec![1.0, 2.0])];
        let (fresh, _) = collection(1000);
        fresh.create("d").unwrap();
        assert!(fresh.add("d", &mixed).is_err());
    }

    #[test]
    fn test_query_rejects_other_width() {
        let (collections, _) = collection(1000);
        collections.create("c").unwrap();
        collections
            .add("c", &[record("a", 0, 1, vec![1.0, 0.0, 0.0, 0.0])])
            .unwrap();

        let result = collections.query("c", &[1.0, 0.0], 5);
        assert!(matches!(
            result,
            Err(KbError::DimensionMismatch {
                expected: 4,
                actual: 2,
                ..
            })
        ));
        assert_eq!(collections.query("c", &[1.0, 0.0, 0.0, 0.0], 5).unwrap().len(), 1);

        // A collection that was never written takes any width
        collections.create("empty").unwrap();
        assert!(collections.query("empty", &[1.0, 0.0], 5).unwrap().is_empty());
        assert!(collections.check_dimension("empty", 7).is_ok());
    }

    #[test]
    fn test_remove_missing_document_is_noop() {
        let (collections, _) = collection(1000);
        collections.create("c").unwrap();
        collections.add("c", &[record("a", 0, 1, vec![1.0])]).unwrap();
        assert_eq!(collections.remove_by_document("c", "zzz").unwrap(), 0);
        assert_eq!(collections.remove_by_document("c", "a").unwrap(), 1);
        assert_eq!(collections.count("c").unwrap(), 0);
    }

    #[test]
    fn test_similarity_from_distance() {
        let (collections, _) = collection(1000);
        collections.create("c").unwrap();
        collections.add("c", &[record("a", 0, 1, vec![1.0, 0.0])]).unwrap();
        let hits = collections.query("c", &[1.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(collections.query("c", &[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_copy_empty_collection() {
        let (collections, _) = collection(1000);
        collections.create("src").unwrap();
        collections.copy_all("src", "dst").unwrap();
        assert!(!collections.exists("src").unwrap());
        assert!(collections.exists("dst").unwrap());
        assert_eq!(collections.count("dst").unwrap(), 0);
    }

    #[test]
    fn test_copy_populated_collection_in_batches() {
        let (collections, _) = collection(3);
        collections.create("src").unwrap();
        let records: Vec<_> = (0..7).map(|i| record("d", i, 7, vec![1.0, i as f32])).collect();
        collections.add("src", &records).unwrap();

        collections.copy_all("src", "dst").unwrap();
        assert!(!collections.exists("src").unwrap());
        assert_eq!(collections.count("dst").unwrap(), 7);

        let copied = collections.passages_for_document("dst", "d").unwrap();
        assert_eq!(copied, records);
    }

    #[test]
    fn test_copy_missing_source() {
        let (collections, _) = collection(1000);
        assert!(matches!(
            collections.copy_all("src", "dst"),
            Err(KbError::CollectionMissing { .. })
        ));
        assert!(!collections.exists("dst").unwrap());
    }

    #[test]
    fn test_copy_onto_existing_destination_keeps_source() {
        let (collections, _) = collection(1000);
        collections.create("src").unwrap();
        collections.add("src", &[record("a", 0, 1, vec![1.0])]).unwrap();
        collections.create("dst").unwrap();

        assert!(matches!(
            collections.copy_all("src", "dst"),
            Err(KbError::CollectionExists { .. })
        ));
        assert_eq!(collections.count("src").unwrap(), 1);
    }
}
