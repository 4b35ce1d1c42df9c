use crate::config::{parse_size, Config, SCHEMA_VERSION};
use crate::error::{KbError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_reindex(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KbError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        match parse_size(&config.storage.max_file_size) {
            Some(0) | None => errors.push(ValidationError::new(
                "storage.max_file_size",
                format!("Invalid size format: {}", config.storage.max_file_size),
            )),
            Some(_) => {}
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Embedding model cannot be empty",
            ));
        }

        if config.embedding.fallback_model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.fallback_model",
                "Fallback model cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        check_chunking(
            "chunking",
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
            errors,
        );
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;
        check_search(
            "search",
            search.hybrid_alpha,
            search.bm25_k1,
            search.bm25_b,
            errors,
        );

        if search.max_limit == 0 {
            errors.push(ValidationError::new(
                "search.max_limit",
                "Max limit must be greater than 0",
            ));
        }

        if search.default_limit == 0 || search.default_limit > search.max_limit {
            errors.push(ValidationError::new(
                "search.default_limit",
                "Default limit must be in [1, max_limit]",
            ));
        }

        if search.overfetch_multiplier == 0 || search.overfetch_cap == 0 {
            errors.push(ValidationError::new(
                "search.overfetch_multiplier",
                "Over-fetch multiplier and cap must be greater than 0",
            ));
        }
    }

    fn validate_reindex(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.reindex.temp_suffix.is_empty() {
            errors.push(ValidationError::new(
                "reindex.temp_suffix",
                "Temporary collection suffix cannot be empty",
            ));
        }

        if config.reindex.copy_batch_size == 0 {
            errors.push(ValidationError::new(
                "reindex.copy_batch_size",
                "Copy batch size must be greater than 0",
            ));
        }
    }
}

/// Chunk size in [50, 8000] and overlap smaller than the chunk size
pub(crate) fn check_chunking(
    prefix: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    errors: &mut Vec<ValidationError>,
) {
    if !(50..=8000).contains(&chunk_size) {
        errors.push(ValidationError::new(
            format!("{}.chunk_size", prefix),
            format!("Chunk size must be in [50, 8000], got {}", chunk_size),
        ));
    }

    if chunk_overlap >= chunk_size {
        errors.push(ValidationError::new(
            format!("{}.chunk_overlap", prefix),
            "Chunk overlap must be smaller than chunk size",
        ));
    }
}

/// Hybrid weight and BM25 parameter ranges
pub(crate) fn check_search(
    prefix: &str,
    alpha: f32,
    k1: f32,
    b: f32,
    errors: &mut Vec<ValidationError>,
) {
    if !(0.0..=1.0).contains(&alpha) {
        errors.push(ValidationError::new(
            format!("{}.hybrid_alpha", prefix),
            "Hybrid alpha must be in [0, 1]",
        ));
    }

    if !(0.0..=3.0).contains(&k1) {
        errors.push(ValidationError::new(
            format!("{}.bm25_k1", prefix),
            "BM25 k1 must be in [0, 3]",
        ));
    }

    if !(0.0..=1.0).contains(&b) {
        errors.push(ValidationError::new(
            format!("{}.bm25_b", prefix),
            "BM25 b must be in [0, 1]",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_alpha_out_of_range() {
        let mut config = Config::default();
        config.search.hybrid_alpha = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.embedding.batch_size = 0;
        config.chunking.chunk_overlap = 600;
        config.search.bm25_k1 = 4.0;

        match ConfigValidator::validate(&config) {
            Err(KbError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.path == "search.bm25_k1"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_size_string() {
        let mut config = Config::default();
        config.storage.max_file_size = "huge".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
