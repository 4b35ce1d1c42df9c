//! Text extraction boundary
//!
//! Format-specific extraction (PDF, DOCX, EPUB, OCR) lives outside this crate
//! behind [`TextExtractor`]. The bundled [`PlainTextExtractor`] handles text
//! files only and reports every other type as unsupported.

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Declared type of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Pdf,
    Image,
    Docx,
    Epub,
}

impl FileType {
    /// Determine file type from the filename extension. Unknown extensions
    /// are treated as text.
    pub fn from_filename(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => FileType::Pdf,
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "gif" => FileType::Image,
            "docx" | "doc" => FileType::Docx,
            "epub" => FileType::Epub,
            _ => FileType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Text => "text",
            FileType::Pdf => "pdf",
            FileType::Image => "image",
            FileType::Docx => "docx",
            FileType::Epub => "epub",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FileType::Text),
            "pdf" => Some(FileType::Pdf),
            "image" => Some(FileType::Image),
            "docx" => Some(FileType::Docx),
            "epub" => Some(FileType::Epub),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts raw text from a stored file.
///
/// Returning an empty string is allowed when a file has no extractable
/// content; callers treat that as [`KbError::ExtractionEmpty`].
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, file_type: FileType) -> Result<String>;
}

/// Extractor for plain text and source files
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, file_type: FileType) -> Result<String> {
        if file_type != FileType::Text {
            return Err(KbError::UnsupportedFormat {
                file: path.display().to_string(),
                file_type: file_type.to_string(),
            });
        }

        let bytes = std::fs::read(path).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to read {}", path.display()),
        })?;

        Ok(decode_text(bytes))
    }
}

/// UTF-8 first, Latin-1 when the bytes are not valid UTF-8
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::debug!("Input is not UTF-8, decoding as Latin-1");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}
