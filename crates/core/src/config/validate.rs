use super::{types::Config, ConfigError};

/// Validate configuration.
///
/// Checks value ranges that serde cannot express: threshold bounds, the
/// ordering of confidence tiers, positive batch sizes and distinct library
/// directory names.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let pipeline = &config.pipeline;
    if !(0.0..=1.0).contains(&pipeline.confidence_threshold) {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.confidence_threshold must be within [0.0, 1.0], got {}",
            pipeline.confidence_threshold
        )));
    }
    if pipeline.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.batch_size cannot be 0".to_string(),
        ));
    }
    if pipeline.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.concurrency cannot be 0".to_string(),
        ));
    }

    let tiers = &config.classification;
    if !(tiers.hinted_confidence < 1.0
        && tiers.subject_mapped_confidence < tiers.hinted_confidence
        && tiers.subject_mapped_confidence > 0.0)
    {
        return Err(ConfigError::ValidationError(format!(
            "classification tiers must satisfy 1.0 > hinted ({}) > subject_mapped ({}) > 0.0",
            tiers.hinted_confidence, tiers.subject_mapped_confidence
        )));
    }

    let enrichment = &config.enrichment;
    if enrichment.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "enrichment.request_timeout_secs cannot be 0".to_string(),
        ));
    }
    if enrichment.total_timeout_secs < enrichment.request_timeout_secs {
        return Err(ConfigError::ValidationError(
            "enrichment.total_timeout_secs must be >= request_timeout_secs".to_string(),
        ));
    }

    if let Some(calibre) = &enrichment.calibre_library {
        if !calibre.join("metadata.db").is_file() {
            return Err(ConfigError::ValidationError(format!(
                "enrichment.calibre_library has no metadata.db: {}",
                calibre.display()
            )));
        }
    }

    let library = &config.library;
    let dirs = [
        ("fiction_dir", &library.fiction_dir),
        ("non_fiction_dir", &library.non_fiction_dir),
        ("returns_dir", &library.returns_dir),
    ];
    for (key, value) in dirs {
        if value.trim().is_empty() || value.contains('/') || value.contains('\\') {
            return Err(ConfigError::ValidationError(format!(
                "library.{} must be a single non-empty directory name",
                key
            )));
        }
    }
    if library.fiction_dir == library.non_fiction_dir
        || library.fiction_dir == library.returns_dir
        || library.non_fiction_dir == library.returns_dir
    {
        return Err(ConfigError::ValidationError(
            "library directory names must be distinct".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LibraryConfig};
    use std::path::PathBuf;

    fn config() -> Config {
        Config::new(LibraryConfig::new(PathBuf::from("/library")))
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&config()).is_ok());
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = config();
        config.pipeline.confidence_threshold = 1.5;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_threshold_bounds_inclusive() {
        let mut config = config();
        config.pipeline.confidence_threshold = 0.0;
        assert!(validate_config(&config).is_ok());
        config.pipeline.confidence_threshold = 1.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_tier_ordering() {
        let mut config = config();
        config.classification.subject_mapped_confidence = 0.9;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = config();
        config.pipeline.batch_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_total_timeout_shorter_than_request() {
        let mut config = config();
        config.enrichment.request_timeout_secs = 30;
        config.enrichment.total_timeout_secs = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_duplicate_directory_names() {
        let mut config = config();
        config.library.returns_dir = "Fiction".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_calibre_library_without_database() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.enrichment.calibre_library = Some(temp.path().to_path_buf());
        assert!(validate_config(&config).is_err());

        std::fs::write(temp.path().join("metadata.db"), b"").unwrap();
        assert!(validate_config(&config).is_ok());
    }
}
