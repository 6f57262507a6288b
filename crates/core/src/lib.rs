pub mod catalog;
pub mod classifier;
pub mod config;
pub mod enricher;
pub mod filer;
pub mod identifier;
pub mod inspector;
pub mod locks;
pub mod pipeline;
pub mod retry;
pub mod review;
pub mod testing;

pub use catalog::{
    CatalogError, CatalogItem, CatalogStats, CatalogStore, FileRef, SourceFileFilter,
    SqliteCatalogStore,
};
pub use classifier::{ClassificationMethod, ClassificationResult, Classifier, ShelfFamily};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthorFormat, Config, ConfigError,
    LogFormat, SanitizedConfig,
};
pub use enricher::{Enricher, MergedMetadata, MetadataSource, SourceError, SourceTag};
pub use filer::{Filer, FilerError, FilingOutcome, FilingPlan};
pub use identifier::{identify, Identifier};
pub use inspector::{inspect, BookFormat, SourceFile, SourceStatus};
pub use pipeline::{
    CancellationFlag, Disposition, FileOutcome, Pipeline, PipelineError, RescanOptions,
    RescanSummary, RunOptions, RunSummary, ScanSummary,
};
pub use review::{
    Hint, ReviewEntry, ReviewError, ReviewFilter, ReviewQueue, ReviewReason, ReviewState,
    TerminalDecision,
};
