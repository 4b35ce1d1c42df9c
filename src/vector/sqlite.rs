//! SQLite-backed [`VectorStore`]
//!
//! Passages live in `vector_records`, one row per passage, with the embedding
//! stored as little-endian `f32` bytes. Queries scan the whole collection and
//! rank by exact cosine distance.

use super::store::{cosine_distance, nearest, VectorStore};
use super::{PassageMetadata, VectorHit, VectorRecord};
use crate::error::{KbError, Result};
use crate::storage::Database;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

pub struct SqliteVectorStore {
    db: Arc<Database>,
}

impl SqliteVectorStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn ensure_exists(&self, conn: &rusqlite::Connection, name: &str) -> Result<()> {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM vector_collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(KbError::CollectionMissing {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn parse_metadata(raw: &str) -> Result<PassageMetadata> {
    serde_json::from_str(raw).map_err(|e| KbError::Json {
        source: e,
        context: "Failed to parse passage metadata".to_string(),
    })
}

/// Columns: id, content, metadata, embedding
fn read_record(row: &Row<'_>) -> rusqlite::Result<(String, String, String, Vec<u8>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record(raw: (String, String, String, Vec<u8>)) -> Result<VectorRecord> {
    let (id, text, metadata, embedding) = raw;
    Ok(VectorRecord {
        id,
        embedding: decode_embedding(&embedding),
        text,
        metadata: parse_metadata(&metadata)?,
    })
}

impl VectorStore for SqliteVectorStore {
    fn create_collection(&self, name: &str) -> Result<()> {
        let conn = self.db.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO vector_collections (name, dimension, created_at)
             VALUES (?1, NULL, ?2)",
            params![name, chrono::Utc::now().to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(KbError::CollectionExists {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM vector_collections WHERE name = ?1",
            params![name],
        )?;
        Ok(deleted > 0)
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM vector_collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare("SELECT name FROM vector_collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn add(&self, name: &str, records: &[VectorRecord]) -> Result<()> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        self.ensure_exists(&tx, name)?;

        if let Some(first) = records.first() {
            tx.execute(
                "UPDATE vector_collections SET dimension = ?1
                 WHERE name = ?2 AND dimension IS NULL",
                params![first.embedding.len() as i64, name],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO vector_records
                    (collection, id, document_id, content, metadata, dimension, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (collection, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    content = excluded.content,
                    metadata = excluded.metadata,
                    dimension = excluded.dimension,
                    embedding = excluded.embedding",
            )?;
            for record in records {
                let metadata = serde_json::to_string(&record.metadata).map_err(|e| KbError::Json {
                    source: e,
                    context: format!("Failed to serialize metadata for {}", record.id),
                })?;
                stmt.execute(params![
                    name,
                    record.id,
                    record.metadata.document_id,
                    record.text,
                    metadata,
                    record.embedding.len() as i64,
                    encode_embedding(&record.embedding),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        self.ensure_exists(&conn, name)?;
        let mut stmt = conn.prepare(
            "SELECT id FROM vector_records WHERE collection = ?1 AND document_id = ?2 ORDER BY seq",
        )?;
        let ids = stmt
            .query_map(params![name, document_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn get_by_document(&self, name: &str, document_id: &str) -> Result<Vec<VectorRecord>> {
        let conn = self.db.get_conn()?;
        self.ensure_exists(&conn, name)?;
        let mut stmt = conn.prepare(
            "SELECT id, content, metadata, embedding FROM vector_records
             WHERE collection = ?1 AND document_id = ?2 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![name, document_id], read_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = rows
            .into_iter()
            .map(into_record)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.metadata.chunk_index);
        Ok(records)
    }

    fn delete_ids(&self, name: &str, ids: &[String]) -> Result<usize> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        self.ensure_exists(&tx, name)?;

        let mut deleted = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM vector_records WHERE collection = ?1 AND id = ?2")?;
            for id in ids {
                deleted += stmt.execute(params![name, id])?;
            }
        }

        tx.commit()?;
        Ok(deleted)
    }

    fn get_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<VectorRecord>> {
        let conn = self.db.get_conn()?;
        self.ensure_exists(&conn, name)?;
        let mut stmt = conn.prepare(
            "SELECT id, content, metadata, embedding FROM vector_records
             WHERE collection = ?1 ORDER BY seq LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![name, limit as i64, offset as i64], read_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_record).collect()
    }

    fn texts(&self, name: &str) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        self.ensure_exists(&conn, name)?;
        let mut stmt =
            conn.prepare("SELECT content FROM vector_records WHERE collection = ?1 ORDER BY seq")?;
        let texts = stmt
            .query_map(params![name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(texts)
    }

    fn query(&self, name: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let conn = self.db.get_conn()?;
        self.ensure_exists(&conn, name)?;
        let mut stmt = conn.prepare(
            "SELECT id, content, metadata, embedding FROM vector_records
             WHERE collection = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![name], read_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut hits = Vec::with_capacity(rows.len());
        for (id, text, metadata, bytes) in rows {
            let distance = cosine_distance(embedding, &decode_embedding(&bytes));
            hits.push(VectorHit {
                id,
                text,
                metadata: parse_metadata(&metadata)?,
                distance,
            });
        }
        Ok(nearest(hits, k))
    }

    fn count(&self, name: &str) -> Result<usize> {
        let conn = self.db.get_conn()?;
        self.ensure_exists(&conn, name)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vector_records WHERE collection = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn dimension(&self, name: &str) -> Result<Option<usize>> {
        let conn = self.db.get_conn()?;
        let dimension: Option<Option<i64>> = conn
            .query_row(
                "SELECT dimension FROM vector_collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match dimension {
            Some(dim) => Ok(dim.map(|d| d as usize)),
            None => Err(KbError::CollectionMissing {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::test_support::record;
    use tempfile::TempDir;

    fn store() -> (SqliteVectorStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("vectors.sqlite")).unwrap();
        (SqliteVectorStore::new(Arc::new(db)), temp)
    }

    #[test]
    fn test_embedding_encoding() {
        let values = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&values)), values);
    }

    #[test]
    fn test_add_and_query() {
        let (store, _temp) = store();
        store.create_collection("kb_1").unwrap();
        assert_eq!(store.dimension("kb_1").unwrap(), None);

        store
            .add(
                "kb_1",
                &[
                    record("a", 0, 1, vec![1.0, 0.0, 0.0]),
                    record("b", 0, 1, vec![0.0, 1.0, 0.0]),
                ],
            )
            .unwrap();

        assert_eq!(store.count("kb_1").unwrap(), 2);
        assert_eq!(store.dimension("kb_1").unwrap(), Some(3));

        let hits = store.query("kb_1", &[0.9, 0.1, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a_chunk_0");
        assert_eq!(hits[0].metadata.filename, "a.txt");
    }

    #[test]
    fn test_missing_collection() {
        let (store, _temp) = store();
        assert!(matches!(
            store.add("nope", &[record("a", 0, 1, vec![1.0])]),
            Err(KbError::CollectionMissing { .. })
        ));
        assert!(matches!(
            store.query("nope", &[1.0], 3),
            Err(KbError::CollectionMissing { .. })
        ));
        assert!(!store.delete_collection("nope").unwrap());
    }

    #[test]
    fn test_delete_cascades_records() {
        let (store, _temp) = store();
        store.create_collection("c").unwrap();
        store.add("c", &[record("a", 0, 1, vec![1.0])]).unwrap();
        assert!(store.delete_collection("c").unwrap());

        store.create_collection("c").unwrap();
        assert_eq!(store.count("c").unwrap(), 0);
        assert_eq!(store.dimension("c").unwrap(), None);
    }

    #[test]
    fn test_pages_in_insertion_order() {
        let (store, _temp) = store();
        store.create_collection("c").unwrap();
        let records: Vec<_> = (0..5).map(|i| record("d", i, 5, vec![i as f32, 1.0])).collect();
        store.add("c", &records).unwrap();

        let first = store.get_page("c", 0, 3).unwrap();
        let rest = store.get_page("c", 3, 3).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(rest.len(), 2);
        assert_eq!(first[0], records[0]);
        assert_eq!(rest[1], records[4]);

        let ids = store.ids_for_document("c", "d").unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(store.delete_ids("c", &ids[..2]).unwrap(), 2);
        assert_eq!(store.texts("c").unwrap().len(), 3);
    }
}
