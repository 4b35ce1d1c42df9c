//! Configuration management for kbindex
//!
//! Application-wide defaults live in a TOML file. Every knowledge base is
//! seeded from the `chunking`, `search` and `embedding` sections when it is
//! created and keeps its own copy afterwards (see [`crate::knowledge_base`]).

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;
pub(crate) use validator::{check_chunking, check_search};

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingDefaults,
    pub search: SearchDefaults,
    pub reindex: ReindexConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Upload size limit, e.g. "50MB"
    pub max_file_size: String,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model used for new knowledge bases
    pub model: String,
    /// Model substituted when a requested model cannot be resolved
    pub fallback_model: String,
    pub batch_size: usize,
}

/// Chunking defaults applied to new knowledge bases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingDefaults {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub overlap_enabled: bool,
}

/// Search defaults applied to new knowledge bases, plus request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDefaults {
    pub hybrid_search: bool,
    pub hybrid_alpha: f32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Vector candidates fetched per requested result in hybrid mode
    pub overfetch_multiplier: usize,
    pub overfetch_cap: usize,
}

/// Reindex configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexConfig {
    pub temp_suffix: String,
    pub copy_batch_size: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KbError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KBINDEX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("KBINDEX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "SEARCH__HYBRID_SEARCH" => {
                self.search.hybrid_search =
                    value.parse().map_err(|_| KbError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "SEARCH__HYBRID_ALPHA" => {
                self.search.hybrid_alpha =
                    value.parse().map_err(|_| KbError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as number", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Upload size limit in bytes
    pub fn max_file_size_bytes(&self) -> Result<u64> {
        parse_size(&self.storage.max_file_size).ok_or_else(|| KbError::InvalidConfigValue {
            path: "storage.max_file_size".to_string(),
            message: format!("Invalid size format: {}", self.storage.max_file_size),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| KbError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("kbindex").join("config.toml"))
    }

    /// Data directory with a leading `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| KbError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".kbindex"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.kbindex"),
                max_file_size: "50MB".to_string(),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                fallback_model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            chunking: ChunkingDefaults {
                chunk_size: 500,
                chunk_overlap: 50,
                overlap_enabled: true,
            },
            search: SearchDefaults {
                hybrid_search: false,
                hybrid_alpha: 0.5,
                bm25_k1: 1.5,
                bm25_b: 0.75,
                default_limit: 10,
                max_limit: 50,
                overfetch_multiplier: 3,
                overfetch_cap: 100,
            },
            reindex: ReindexConfig {
                temp_suffix: "_temp_reindex".to_string(),
                copy_batch_size: 1000,
            },
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Parse size strings like "50MB", "512KB", "1GB" or a plain byte count
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("50MB"), Some(50 * 1024 * 1024));
        assert_eq!(parse_size("512kb"), Some(512 * 1024));
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("100"), Some(100));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.search.hybrid_alpha = 0.7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.search.hybrid_alpha, 0.7);
        assert_eq!(loaded.chunking.chunk_size, 500);
        assert_eq!(loaded.reindex.temp_suffix, "_temp_reindex");
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/var/lib/kbindex");
        assert_eq!(expand_tilde(plain), plain.to_path_buf());

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.kbindex")), home.join(".kbindex"));
        }
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/kbindex.toml"));
        assert!(matches!(result, Err(KbError::ConfigNotFound { .. })));
    }
}
