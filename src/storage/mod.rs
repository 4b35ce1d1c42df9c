//! Storage layer for kbindex
//!
//! Lays out the data directory and owns the SQLite database:
//!
//! ```text
//! <data_dir>/
//!   kbindex.sqlite        catalog + vector collections
//!   files/<kb_id>/        uploaded source files
//! ```

pub mod database;

use crate::error::{KbError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use database::{Database, DbPool};

/// Storage manager that coordinates the database and uploaded files
pub struct StorageManager {
    pub database: Arc<Database>,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let files = base_path.join("files");
        std::fs::create_dir_all(&files).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to create files directory: {}", files.display()),
        })?;

        let database = Database::new(&base_path.join("kbindex.sqlite"))?;

        Ok(Self {
            database: Arc::new(database),
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding the uploaded files of one knowledge base
    pub fn files_dir(&self, kb_id: &str) -> PathBuf {
        self.base_path.join("files").join(kb_id)
    }

    /// Copy an uploaded file into the knowledge base directory.
    ///
    /// The stored name is `{stem}_{uuid8}{ext}` so repeated uploads of the
    /// same filename never collide.
    pub fn store_file(&self, kb_id: &str, source: &Path, filename: &str) -> Result<PathBuf> {
        let dir = self.files_dir(kb_id);
        std::fs::create_dir_all(&dir).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to create upload directory: {}", dir.display()),
        })?;

        let target = dir.join(unique_filename(filename));
        std::fs::copy(source, &target).map_err(|e| KbError::Io {
            source: e,
            context: format!(
                "Failed to store {} as {}",
                source.display(),
                target.display()
            ),
        })?;

        Ok(target)
    }

    /// Remove a stored file; a file that is already gone is not an error
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KbError::Io {
                source: e,
                context: format!("Failed to remove {}", path.display()),
            }),
        }
    }

    /// Remove all uploaded files of a knowledge base
    pub fn remove_files_dir(&self, kb_id: &str) -> Result<()> {
        let dir = self.files_dir(kb_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to remove {}", dir.display()),
            })?;
        }
        Ok(())
    }
}

fn unique_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, &suffix[..8], ext),
        None => format!("{}_{}", stem, &suffix[..8]),
    }
}

/// Format size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
