//! In-memory [`VectorStore`] for tests and ephemeral indexes.
//!
//! Collections are `Vec`s in insertion order behind a `RwLock`. Queries are a
//! brute-force cosine scan over every stored vector.

use super::store::{cosine_distance, nearest, VectorStore};
use super::{VectorHit, VectorRecord};
use crate::error::{KbError, Result};
use ahash::AHashMap;
use std::sync::RwLock;

#[derive(Default)]
struct MemCollection {
    dimension: Option<usize>,
    records: Vec<VectorRecord>,
}

/// In-memory vector store
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<AHashMap<String, MemCollection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, name: &str, f: impl FnOnce(&MemCollection) -> T) -> Result<T> {
        let collections = self
            .collections
            .read()
            .map_err(|_| KbError::poisoned("memory vector store"))?;
        let collection = collections
            .get(name)
            .ok_or_else(|| KbError::CollectionMissing {
                name: name.to_string(),
            })?;
        Ok(f(collection))
    }

    fn write<T>(&self, name: &str, f: impl FnOnce(&mut MemCollection) -> T) -> Result<T> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| KbError::poisoned("memory vector store"))?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| KbError::CollectionMissing {
                name: name.to_string(),
            })?;
        Ok(f(collection))
    }
}

impl VectorStore for MemoryVectorStore {
    fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| KbError::poisoned("memory vector store"))?;
        if collections.contains_key(name) {
            return Err(KbError::CollectionExists {
                name: name.to_string(),
            });
        }
        collections.insert(name.to_string(), MemCollection::default());
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| KbError::poisoned("memory vector store"))?;
        Ok(collections.remove(name).is_some())
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        let collections = self
            .collections
            .read()
            .map_err(|_| KbError::poisoned("memory vector store"))?;
        Ok(collections.contains_key(name))
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| KbError::poisoned("memory vector store"))?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn add(&self, name: &str, records: &[VectorRecord]) -> Result<()> {
        self.write(name, |collection| {
            for record in records {
                if collection.dimension.is_none() {
                    collection.dimension = Some(record.embedding.len());
                }
                match collection.records.iter_mut().find(|r| r.id == record.id) {
                    Some(existing) => *existing = record.clone(),
                    None => collection.records.push(record.clone()),
                }
            }
        })
    }

    fn ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>> {
        self.read(name, |collection| {
            collection
                .records
                .iter()
                .filter(|r| r.metadata.document_id == document_id)
                .map(|r| r.id.clone())
                .collect()
        })
    }

    fn get_by_document(&self, name: &str, document_id: &str) -> Result<Vec<VectorRecord>> {
        self.read(name, |collection| {
            let mut records: Vec<VectorRecord> = collection
                .records
                .iter()
                .filter(|r| r.metadata.document_id == document_id)
                .cloned()
                .collect();
            records.sort_by_key(|r| r.metadata.chunk_index);
            records
        })
    }

    fn delete_ids(&self, name: &str, ids: &[String]) -> Result<usize> {
        self.write(name, |collection| {
            let before = collection.records.len();
            collection.records.retain(|r| !ids.contains(&r.id));
            before - collection.records.len()
        })
    }

    fn get_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<VectorRecord>> {
        self.read(name, |collection| {
            collection
                .records
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    fn texts(&self, name: &str) -> Result<Vec<String>> {
        self.read(name, |collection| {
            collection.records.iter().map(|r| r.text.clone()).collect()
        })
    }

    fn query(&self, name: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.read(name, |collection| {
            let hits = collection
                .records
                .iter()
                .map(|r| VectorHit {
                    id: r.id.clone(),
                    text: r.text.clone(),
                    metadata: r.metadata.clone(),
                    distance: cosine_distance(embedding, &r.embedding),
                })
                .collect();
            nearest(hits, k)
        })
    }

    fn count(&self, name: &str) -> Result<usize> {
        self.read(name, |collection| collection.records.len())
    }

    fn dimension(&self, name: &str) -> Result<Option<usize>> {
        self.read(name, |collection| collection.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::test_support::record;

    #[test]
    fn test_collection_lifecycle() {
        let store = MemoryVectorStore::new();
        store.create_collection("kb_a").unwrap();
        assert!(store.has_collection("kb_a").unwrap());
        assert!(matches!(
            store.create_collection("kb_a"),
            Err(KbError::CollectionExists { .. })
        ));

        assert!(store.delete_collection("kb_a").unwrap());
        assert!(!store.delete_collection("kb_a").unwrap());
        assert!(matches!(
            store.count("kb_a"),
            Err(KbError::CollectionMissing { .. })
        ));
    }

    #[test]
    fn test_add_replaces_same_id() {
        let store = MemoryVectorStore::new();
        store.create_collection("c").unwrap();
        store.add("c", &[record("d1", 0, 1, vec![1.0, 0.0])]).unwrap();
        store.add("c", &[record("d1", 0, 1, vec![0.0, 1.0])]).unwrap();

        assert_eq!(store.count("c").unwrap(), 1);
        assert_eq!(store.dimension("c").unwrap(), Some(2));
        let page = store.get_page("c", 0, 10).unwrap();
        assert_eq!(page[0].embedding, vec![0.0, 1.0]);
    }

    #[test]
    fn test_query_orders_by_distance() {
        let store = MemoryVectorStore::new();
        store.create_collection("c").unwrap();
        store
            .add(
                "c",
                &[
                    record("far", 0, 1, vec![0.0, 1.0]),
                    record("near", 0, 1, vec![1.0, 0.1]),
                    record("mid", 0, 1, vec![1.0, 1.0]),
                ],
            )
            .unwrap();

        let hits = store.query("c", &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.document_id, "near");
        assert_eq!(hits[1].metadata.document_id, "mid");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn test_document_lookup_and_delete() {
        let store = MemoryVectorStore::new();
        store.create_collection("c").unwrap();
        store
            .add(
                "c",
                &[
                    record("d1", 1, 2, vec![1.0]),
                    record("d2", 0, 1, vec![1.0]),
                    record("d1", 0, 2, vec![1.0]),
                ],
            )
            .unwrap();

        let passages = store.get_by_document("c", "d1").unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].metadata.chunk_index, 0);

        let ids = store.ids_for_document("c", "d1").unwrap();
        assert_eq!(store.delete_ids("c", &ids).unwrap(), 2);
        assert_eq!(store.texts("c").unwrap(), vec!["passage 0 of d2".to_string()]);
    }
}
