use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub library: LibraryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Creates a configuration with defaults for everything but the library.
    pub fn new(library: LibraryConfig) -> Self {
        Self {
            library,
            pipeline: PipelineConfig::default(),
            enrichment: EnrichmentConfig::default(),
            classification: ClassificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Sets the auto-filing threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.pipeline.confidence_threshold = threshold;
        self
    }
}

/// Library layout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Root of the managed library.
    pub root: PathBuf,
    #[serde(default = "default_fiction_dir")]
    pub fiction_dir: String,
    #[serde(default = "default_non_fiction_dir")]
    pub non_fiction_dir: String,
    /// Intake area, relative to the root.
    #[serde(default = "default_returns_dir")]
    pub returns_dir: String,
    /// Catalog database. Defaults to `<root>/.librarian.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub author_format: AuthorFormat,
}

impl LibraryConfig {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            fiction_dir: default_fiction_dir(),
            non_fiction_dir: default_non_fiction_dir(),
            returns_dir: default_returns_dir(),
            database: None,
            author_format: AuthorFormat::default(),
        }
    }

    pub fn fiction_root(&self) -> PathBuf {
        self.root.join(&self.fiction_dir)
    }

    pub fn non_fiction_root(&self) -> PathBuf {
        self.root.join(&self.non_fiction_dir)
    }

    pub fn returns_root(&self) -> PathBuf {
        self.root.join(&self.returns_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.root.join(".librarian.db"))
    }
}

fn default_fiction_dir() -> String {
    "Fiction".to_string()
}

fn default_non_fiction_dir() -> String {
    "Non-Fiction".to_string()
}

fn default_returns_dir() -> String {
    ".returns".to_string()
}

/// How author names appear in canonical file names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorFormat {
    /// "Robert C. Martin"
    #[default]
    FirstLast,
    /// "Martin, Robert C."
    LastFirst,
}

/// Batch driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Minimum classification confidence for automatic filing (inclusive).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Files processed concurrently within a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Re-hash copies made across filesystems before removing the source.
    #[serde(default = "default_true")]
    pub verify_checksum: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            verify_checksum: true,
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.8
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// External metadata source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Timeout for a single HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Budget for all lookups of a single file.
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    /// Retries after the first attempt for transient errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_true")]
    pub oclc: bool,
    #[serde(default = "default_true")]
    pub openlibrary: bool,
    #[serde(default = "default_true")]
    pub google_books: bool,
    #[serde(default)]
    pub google_books_api_key: Option<String>,
    /// Related editions and tags from LibraryThing. Off unless enabled.
    #[serde(default)]
    pub librarything: bool,
    /// Developer key for work details; without it only related ISBNs are fetched.
    #[serde(default)]
    pub librarything_api_key: Option<String>,
    /// Calibre library directory (holding `metadata.db`) to fill gaps from.
    #[serde(default)]
    pub calibre_library: Option<PathBuf>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl EnrichmentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            total_timeout_secs: default_total_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            oclc: true,
            openlibrary: true,
            google_books: true,
            google_books_api_key: None,
            librarything: false,
            librarything_api_key: None,
            calibre_library: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_total_timeout_secs() -> u64 {
    45
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_user_agent() -> String {
    format!("librarian/{}", env!("CARGO_PKG_VERSION"))
}

/// Classifier tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassificationConfig {
    /// Confidence for a classification hint from a non-authoritative source.
    #[serde(default = "default_hinted_confidence")]
    pub hinted_confidence: f32,
    /// Confidence for a code derived from subject headings.
    #[serde(default = "default_subject_mapped_confidence")]
    pub subject_mapped_confidence: f32,
    /// Replacement subject table (TOML). The built-in table is used if unset.
    #[serde(default)]
    pub subject_table: Option<PathBuf>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            hinted_confidence: default_hinted_confidence(),
            subject_mapped_confidence: default_subject_mapped_confidence(),
            subject_table: None,
        }
    }
}

fn default_hinted_confidence() -> f32 {
    0.85
}

fn default_subject_mapped_confidence() -> f32 {
    0.6
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Configuration safe to print (secrets replaced by flags).
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub library_root: PathBuf,
    pub database: PathBuf,
    pub confidence_threshold: f32,
    pub batch_size: usize,
    pub concurrency: usize,
    pub sources: Vec<String>,
    pub google_books_api_key_configured: bool,
    pub librarything_api_key_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let mut sources = Vec::new();
        if config.enrichment.oclc {
            sources.push("oclc".to_string());
        }
        if config.enrichment.openlibrary {
            sources.push("open_library".to_string());
        }
        if config.enrichment.google_books {
            sources.push("google_books".to_string());
        }
        if config.enrichment.librarything {
            sources.push("librarything".to_string());
        }
        if config.enrichment.calibre_library.is_some() {
            sources.push("calibre".to_string());
        }
        Self {
            library_root: config.library.root.clone(),
            database: config.library.database_path(),
            confidence_threshold: config.pipeline.confidence_threshold,
            batch_size: config.pipeline.batch_size,
            concurrency: config.pipeline.concurrency,
            sources,
            google_books_api_key_configured: config.enrichment.google_books_api_key.is_some(),
            librarything_api_key_configured: config.enrichment.librarything_api_key.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[library]
root = "/srv/books"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.library.fiction_dir, "Fiction");
        assert_eq!(config.library.non_fiction_dir, "Non-Fiction");
        assert_eq!(config.library.returns_dir, ".returns");
        assert_eq!(config.pipeline.confidence_threshold, 0.8);
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.enrichment.max_retries, 3);
        assert_eq!(config.classification.hinted_confidence, 0.85);
        assert_eq!(config.classification.subject_mapped_confidence, 0.6);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_library_paths() {
        let library = LibraryConfig::new(PathBuf::from("/srv/books"));
        assert_eq!(library.returns_root(), PathBuf::from("/srv/books/.returns"));
        assert_eq!(library.fiction_root(), PathBuf::from("/srv/books/Fiction"));
        assert_eq!(
            library.database_path(),
            PathBuf::from("/srv/books/.librarian.db")
        );
    }

    #[test]
    fn test_custom_database_path() {
        let toml = r#"
[library]
root = "/srv/books"
database = "/var/lib/librarian/catalog.db"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.library.database_path(),
            PathBuf::from("/var/lib/librarian/catalog.db")
        );
    }

    #[test]
    fn test_sanitized_config_hides_api_key() {
        let mut config = Config::new(LibraryConfig::new(PathBuf::from("/srv/books")));
        config.enrichment.google_books_api_key = Some("secret".to_string());
        config.enrichment.oclc = false;

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.google_books_api_key_configured);
        assert_eq!(sanitized.sources, vec!["open_library", "google_books"]);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_optional_sources_listed_when_enabled() {
        let mut config = Config::new(LibraryConfig::new(PathBuf::from("/srv/books")));
        config.enrichment.librarything = true;
        config.enrichment.librarything_api_key = Some("lt-key".to_string());
        config.enrichment.calibre_library = Some(PathBuf::from("/srv/calibre"));

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(
            sanitized.sources,
            vec!["oclc", "open_library", "google_books", "librarything", "calibre"]
        );
        assert!(sanitized.librarything_api_key_configured);
        assert!(!serde_json::to_string(&sanitized).unwrap().contains("lt-key"));
    }
}
