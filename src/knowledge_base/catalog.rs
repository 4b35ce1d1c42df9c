/// SQLite persistence for knowledge bases and documents
use super::{Document, KnowledgeBase, KnowledgeBaseConfig};
use crate::error::{KbError, Result};
use crate::extract::FileType;
use crate::storage::Database;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;

const KB_COLUMNS: &str = "kb.id, kb.name, kb.description, kb.created_at, kb.config, kb.indexed_model,
     (SELECT COUNT(*) FROM documents d WHERE d.kb_id = kb.id)";

const DOC_COLUMNS: &str =
    "id, kb_id, filename, file_path, file_type, file_size, chunk_count, processed_at";

/// Fixed-width timestamps so text ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn read_kb(row: &Row<'_>) -> rusqlite::Result<KnowledgeBase> {
    let created_at: String = row.get(3)?;
    let config: String = row.get(4)?;
    let config: KnowledgeBaseConfig = serde_json::from_str(&config)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    let indexed_model: Option<String> = row.get(5)?;
    let file_count: i64 = row.get(6)?;

    Ok(KnowledgeBase {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: parse_timestamp(3, &created_at)?,
        indexed_model: indexed_model.unwrap_or_else(|| config.embedding_model.clone()),
        config,
        file_count: file_count as usize,
    })
}

fn read_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let file_path: String = row.get(3)?;
    let file_type: String = row.get(4)?;
    let file_size: i64 = row.get(5)?;
    let chunk_count: i64 = row.get(6)?;
    let processed_at: String = row.get(7)?;

    Ok(Document {
        id: row.get(0)?,
        kb_id: row.get(1)?,
        filename: row.get(2)?,
        file_path: PathBuf::from(file_path),
        file_type: FileType::parse(&file_type)
            .ok_or_else(|| conversion_error(4, format!("Unknown file type: {}", file_type)))?,
        file_size: file_size as u64,
        chunk_count: chunk_count as usize,
        processed_at: parse_timestamp(7, &processed_at)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn config_json(config: &KnowledgeBaseConfig) -> Result<String> {
    serde_json::to_string(config).map_err(|e| KbError::Json {
        source: e,
        context: "Failed to serialize knowledge base config".to_string(),
    })
}

/// Knowledge base and document metadata store
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert_kb(&self, kb: &KnowledgeBase) -> Result<()> {
        let conn = self.db.get_conn()?;
        let result = conn.execute(
            "INSERT INTO knowledge_bases (id, name, description, created_at, config, indexed_model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                kb.id,
                kb.name,
                kb.description,
                format_timestamp(&kb.created_at),
                config_json(&kb.config)?,
                kb.indexed_model,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(KbError::DuplicateName {
                name: kb.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_kb(&self, id: &str) -> Result<KnowledgeBase> {
        let conn = self.db.get_conn()?;
        conn.query_row(
            &format!("SELECT {} FROM knowledge_bases kb WHERE kb.id = ?1", KB_COLUMNS),
            params![id],
            read_kb,
        )
        .optional()?
        .ok_or_else(|| KbError::KnowledgeBaseNotFound { id: id.to_string() })
    }

    pub fn find_kb_by_name(&self, name: &str) -> Result<Option<KnowledgeBase>> {
        let conn = self.db.get_conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM knowledge_bases kb WHERE kb.name = ?1", KB_COLUMNS),
                params![name],
                read_kb,
            )
            .optional()?)
    }

    /// All knowledge bases, oldest first
    pub fn list_kbs(&self) -> Result<Vec<KnowledgeBase>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM knowledge_bases kb ORDER BY kb.created_at, kb.name",
            KB_COLUMNS
        ))?;
        let kbs = stmt
            .query_map([], read_kb)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(kbs)
    }

    /// Update name and/or description. An empty description clears it.
    pub fn update_kb_details(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<KnowledgeBase> {
        let conn = self.db.get_conn()?;

        if let Some(name) = name {
            let result = conn.execute(
                "UPDATE knowledge_bases SET name = ?1 WHERE id = ?2",
                params![name, id],
            );
            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(KbError::DuplicateName {
                        name: name.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(description) = description {
            let description = (!description.is_empty()).then_some(description);
            conn.execute(
                "UPDATE knowledge_bases SET description = ?1 WHERE id = ?2",
                params![description, id],
            )?;
        }

        drop(conn);
        self.get_kb(id)
    }

    pub fn update_config(&self, id: &str, config: &KnowledgeBaseConfig) -> Result<()> {
        let conn = self.db.get_conn()?;
        let updated = conn.execute(
            "UPDATE knowledge_bases SET config = ?1 WHERE id = ?2",
            params![config_json(config)?, id],
        )?;
        if updated == 0 {
            return Err(KbError::KnowledgeBaseNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn set_indexed_model(&self, id: &str, model: &str) -> Result<()> {
        let conn = self.db.get_conn()?;
        conn.execute(
            "UPDATE knowledge_bases SET indexed_model = ?1 WHERE id = ?2",
            params![model, id],
        )?;
        Ok(())
    }

    /// Delete a knowledge base and its document rows
    pub fn delete_kb(&self, id: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let deleted = conn.execute("DELETE FROM knowledge_bases WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.db.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                DOC_COLUMNS
            ),
            params![
                doc.id,
                doc.kb_id,
                doc.filename,
                doc.file_path.to_string_lossy().into_owned(),
                doc.file_type.as_str(),
                doc.file_size as i64,
                doc.chunk_count as i64,
                format_timestamp(&doc.processed_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Document> {
        let conn = self.db.get_conn()?;
        conn.query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", DOC_COLUMNS),
            params![id],
            read_document,
        )
        .optional()?
        .ok_or_else(|| KbError::DocumentNotFound { id: id.to_string() })
    }

    /// Documents of a knowledge base, newest first
    pub fn list_documents(&self, kb_id: &str) -> Result<Vec<Document>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE kb_id = ?1 ORDER BY processed_at DESC, rowid DESC",
            DOC_COLUMNS
        ))?;
        let docs = stmt
            .query_map(params![kb_id], read_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Overwrite chunk counts without touching processing timestamps
    pub fn set_chunk_counts(&self, counts: &[(String, usize)]) -> Result<()> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE documents SET chunk_count = ?1 WHERE id = ?2")?;
            for (id, count) in counts {
                stmt.execute(params![*count as i64, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn catalog() -> (Catalog, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("catalog.sqlite")).unwrap();
        (Catalog::new(Arc::new(db)), temp)
    }

    fn kb(id: &str, name: &str) -> KnowledgeBase {
        let config = KnowledgeBaseConfig::from_defaults(&Config::default());
        KnowledgeBase {
            id: id.to_string(),
            name: name.to_string(),
            description: Some("test kb".to_string()),
            created_at: Utc::now(),
            indexed_model: config.embedding_model.clone(),
            config,
            file_count: 0,
        }
    }

    fn doc(id: &str, kb_id: &str, processed_at: DateTime<Utc>) -> Document {
        Document {
            id: id.to_string(),
            kb_id: kb_id.to_string(),
            filename: format!("{}.txt", id),
            file_path: PathBuf::from(format!("/tmp/{}.txt", id)),
            file_type: FileType::Text,
            file_size: 120,
            chunk_count: 3,
            processed_at,
        }
    }

    #[test]
    fn test_kb_roundtrip() {
        let (catalog, _temp) = catalog();
        catalog.insert_kb(&kb("k1", "Research")).unwrap();

        let loaded = catalog.get_kb("k1").unwrap();
        assert_eq!(loaded.name, "Research");
        assert_eq!(loaded.config.chunking.chunk_size, 500);
        assert_eq!(loaded.indexed_model, "all-MiniLM-L6-v2");
        assert_eq!(loaded.file_count, 0);
        assert!(catalog.find_kb_by_name("Research").unwrap().is_some());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (catalog, _temp) = catalog();
        catalog.insert_kb(&kb("k1", "Research")).unwrap();
        assert!(matches!(
            catalog.insert_kb(&kb("k2", "Research")),
            Err(KbError::DuplicateName { .. })
        ));

        catalog.insert_kb(&kb("k2", "Other")).unwrap();
        assert!(matches!(
            catalog.update_kb_details("k2", Some("Research"), None),
            Err(KbError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_update_details() {
        let (catalog, _temp) = catalog();
        catalog.insert_kb(&kb("k1", "Research")).unwrap();

        let updated = catalog
            .update_kb_details("k1", Some("Renamed"), Some(""))
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(updated.description.is_none());
    }

    #[test]
    fn test_documents_newest_first_and_cascade() {
        let (catalog, _temp) = catalog();
        catalog.insert_kb(&kb("k1", "Research")).unwrap();

        let now = Utc::now();
        catalog
            .insert_document(&doc("old", "k1", now - chrono::Duration::seconds(60)))
            .unwrap();
        catalog.insert_document(&doc("new", "k1", now)).unwrap();

        let docs = catalog.list_documents("k1").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "new");
        assert_eq!(catalog.get_kb("k1").unwrap().file_count, 2);

        catalog.set_chunk_counts(&[("old".to_string(), 7)]).unwrap();
        assert_eq!(catalog.get_document("old").unwrap().chunk_count, 7);

        assert!(catalog.delete_kb("k1").unwrap());
        assert!(matches!(
            catalog.get_document("new"),
            Err(KbError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_kb() {
        let (catalog, _temp) = catalog();
        assert!(matches!(
            catalog.get_kb("nope"),
            Err(KbError::KnowledgeBaseNotFound { .. })
        ));
        assert!(!catalog.delete_kb("nope").unwrap());
    }
}
