mod common;

use common::FaultyStore;
use kbindex::extract::FileType;
use kbindex::storage::Database;
use kbindex::vector::{
    passage_id, PassageMetadata, SqliteVectorStore, VectorCollection, VectorRecord, VectorStore,
};
use kbindex::KbError;
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite_collections(batch: usize) -> (VectorCollection, Arc<SqliteVectorStore>, TempDir) {
    let temp = TempDir::new().unwrap();
    let db = Database::new(&temp.path().join("vectors.sqlite")).unwrap();
    let store = Arc::new(SqliteVectorStore::new(Arc::new(db)));
    (
        VectorCollection::new(store.clone(), "_temp_reindex", batch),
        store,
        temp,
    )
}

fn passages(doc: &str, count: usize) -> Vec<VectorRecord> {
    (0..count)
        .map(|i| VectorRecord {
            id: passage_id(doc, i),
            embedding: vec![1.0, i as f32, (count - i) as f32],
            text: format!("{} passage {} of {}", doc, i, count),
            metadata: PassageMetadata {
                document_id: doc.to_string(),
                filename: format!("{}.txt", doc),
                file_type: FileType::Text,
                chunk_index: i,
                total_chunks: count,
            },
        })
        .collect()
}

#[test]
fn test_rename_populated_collection_in_batches() {
    let (collections, store, _temp) = sqlite_collections(4);
    let src = collections.temp_name("kb1");
    let dst = collections.production_name("kb1");

    collections.create(&src).unwrap();
    let alpha = passages("alpha", 7);
    let beta = passages("beta", 3);
    collections.add(&src, &alpha).unwrap();
    collections.add(&src, &beta).unwrap();

    collections.copy_all(&src, &dst).unwrap();

    assert!(!collections.exists(&src).unwrap());
    assert_eq!(collections.count(&dst).unwrap(), 10);
    assert_eq!(collections.passages_for_document(&dst, "alpha").unwrap(), alpha);
    assert_eq!(collections.passages_for_document(&dst, "beta").unwrap(), beta);
    assert_eq!(store.dimension(&dst).unwrap(), Some(3));
}

#[test]
fn test_rename_empty_collection() {
    let (collections, _store, _temp) = sqlite_collections(1000);
    collections.create("kb_empty_temp_reindex").unwrap();

    collections
        .copy_all("kb_empty_temp_reindex", "kb_empty")
        .unwrap();
    assert!(!collections.exists("kb_empty_temp_reindex").unwrap());
    assert!(collections.exists("kb_empty").unwrap());
    assert_eq!(collections.count("kb_empty").unwrap(), 0);
}

#[test]
fn test_failed_rename_keeps_source() {
    let (collections, _store, _temp) = sqlite_collections(1000);
    collections.create("src").unwrap();
    collections.add("src", &passages("doc", 2)).unwrap();
    collections.create("dst").unwrap();

    assert!(matches!(
        collections.copy_all("src", "dst"),
        Err(KbError::CollectionExists { .. })
    ));
    assert_eq!(collections.count("src").unwrap(), 2);
}

#[test]
fn test_rename_failing_midway_keeps_both_collections() {
    let store = Arc::new(FaultyStore::new());
    let collections = VectorCollection::new(store.clone(), "_temp_reindex", 4);
    let records = passages("doc", 10);
    collections.create("src").unwrap();
    collections.add("src", &records).unwrap();

    // First batch lands, the second is rejected
    store.fail_adds_to("dst", 1);
    assert!(collections.copy_all("src", "dst").is_err());

    assert_eq!(collections.count("src").unwrap(), 10);
    assert_eq!(collections.passages_for_document("src", "doc").unwrap(), records);
    assert!(collections.exists("dst").unwrap());
    assert_eq!(collections.count("dst").unwrap(), 4);

    // Once writes succeed again the rename completes
    store.clear_faults();
    collections.delete("dst").unwrap();
    collections.copy_all("src", "dst").unwrap();
    assert!(!collections.exists("src").unwrap());
    assert_eq!(collections.passages_for_document("dst", "doc").unwrap(), records);
}

#[test]
fn test_collections_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("vectors.sqlite");
    {
        let db = Database::new(&path).unwrap();
        let collections =
            VectorCollection::new(Arc::new(SqliteVectorStore::new(Arc::new(db))), "_tmp", 100);
        collections.create("kb_keep").unwrap();
        collections.add("kb_keep", &passages("doc", 5)).unwrap();
    }

    let db = Database::new(&path).unwrap();
    let collections =
        VectorCollection::new(Arc::new(SqliteVectorStore::new(Arc::new(db))), "_tmp", 100);
    assert_eq!(collections.list().unwrap(), vec!["kb_keep".to_string()]);

    let hits = collections.query("kb_keep", &[1.0, 4.0, 1.0], 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].metadata.chunk_index, 4);
    assert!(hits[0].similarity > hits[1].similarity);

    assert_eq!(collections.remove_by_document("kb_keep", "doc").unwrap(), 5);
    assert_eq!(collections.remove_by_document("kb_keep", "doc").unwrap(), 0);
}
