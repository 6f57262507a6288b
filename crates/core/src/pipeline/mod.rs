//! Batch driver: intake scan, then enrich, classify and file each pending
//! source file.
//!
//! `scan` inspects and identifies everything in the intake area and records
//! it as `pending`. Byte-identical pending copies are then grouped: the best
//! one stays pending and the rest become its duplicates. `run` works through
//! pending files that are not held for review, a batch at a time, with at
//! most `pipeline.concurrency` files in flight. Files below the confidence
//! threshold, and files whose canonical target is taken by other content,
//! go to the review queue. A move or catalog failure puts the file back in
//! `pending` with the error recorded; only a file that is itself the
//! problem ends up `failed`. `rescan` re-inspects recorded files in place.
//!
//! The pipeline is also the [`ReviewResolver`] for its queue: a reviewer's
//! hint re-runs enrichment and classification here, and filing goes through
//! the same [`Filer`].

mod copies;
mod types;

pub use types::*;

use async_trait::async_trait;
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::catalog::{
    CatalogError, CatalogStats, CatalogStore, SourceFileFilter, SqliteCatalogStore,
};
use crate::classifier::{ClassificationResult, Classifier, ClassifierError};
use crate::config::Config;
use crate::enricher::{
    ClassificationHint, EnrichmentCandidate, Enricher, LookupQuery, MergedMetadata,
    MetadataSource, SourceError, SourceTag,
};
use crate::filer::{Filer, FilerError};
use crate::identifier::{identify, Identifier, IdentifierOrigin};
use crate::inspector::{inspect, scan_intake, ScanError, SourceFile, SourceStatus};
use crate::review::{
    Hint, NewReview, Reassessment, ReviewEntry, ReviewError, ReviewFiling, ReviewQueue,
    ReviewReason, ReviewResolver, ReviewStore, TerminalDecision,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Intake scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Metadata source setup failed: {0}")]
    Source(#[from] SourceError),

    #[error("Classifier setup failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Review error: {0}")]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Filer(#[from] FilerError),
}

impl PipelineError {
    /// Errors that say nothing about the file. It goes back to `pending`
    /// for the next run instead of `failed`.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Filer(e) => e.is_retryable(),
            PipelineError::Catalog(_) | PipelineError::Review(_) => true,
            PipelineError::Scan(_) | PipelineError::Source(_) | PipelineError::Classifier(_) => {
                false
            }
        }
    }
}

/// Ingestion pipeline over one library.
pub struct Pipeline {
    config: Config,
    catalog: Arc<dyn CatalogStore>,
    enricher: Enricher,
    classifier: Classifier,
    filer: Filer,
    review: ReviewQueue,
}

impl Pipeline {
    /// Creates a pipeline over `store`, querying `sources`.
    pub fn new<S>(
        config: Config,
        store: Arc<S>,
        sources: Vec<Arc<dyn MetadataSource>>,
        classifier: Classifier,
    ) -> Self
    where
        S: CatalogStore + ReviewStore + 'static,
    {
        let enricher = Enricher::new(sources).with_limits(&config.enrichment);
        let catalog: Arc<dyn CatalogStore> = store.clone();
        let reviews: Arc<dyn ReviewStore> = store;
        let filer = Filer::from_config(&config, Arc::clone(&catalog));
        let review = ReviewQueue::new(reviews, Arc::clone(&catalog));
        Self {
            config,
            catalog,
            enricher,
            classifier,
            filer,
            review,
        }
    }

    /// Opens the configured catalog database and builds the enabled
    /// metadata sources.
    pub fn open(config: Config) -> Result<Self, PipelineError> {
        let store = Arc::new(SqliteCatalogStore::new(&config.library.database_path())?);
        let enricher = Enricher::from_config(&config.enrichment)?;
        let classifier = Classifier::from_config(&config.classification)?;
        info!(
            root = %config.library.root.display(),
            sources = ?enricher.source_tags(),
            "Pipeline ready"
        );
        Ok(Self::new(config, store, Vec::new(), classifier).with_enricher(enricher))
    }

    /// Replaces the enricher, e.g. to change retry or trust settings.
    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn review(&self) -> &ReviewQueue {
        &self.review
    }

    pub fn filer(&self) -> &Filer {
        &self.filer
    }

    pub fn stats(&self) -> Result<CatalogStats, PipelineError> {
        Ok(self.catalog.stats()?)
    }

    /// Inspects every file in the intake area and records it.
    ///
    /// Recording is idempotent on path and checksum, so a re-scan only adds
    /// new or changed files. Rows an interrupted run left in `processing`
    /// go back to `pending` first.
    pub async fn scan(&self) -> Result<ScanSummary, PipelineError> {
        let returns = self.config.library.returns_root();
        let mut summary = ScanSummary {
            reset: self.catalog.reset_processing()?,
            ..Default::default()
        };
        if summary.reset > 0 {
            warn!(count = summary.reset, "Reset files left processing by an earlier run");
        }

        let paths = scan_intake(&returns)?;
        summary.discovered = paths.len();
        info!(intake = %returns.display(), files = paths.len(), "Scanning intake");

        let mut inspections = stream::iter(paths)
            .map(|path| async move {
                let result = inspect(&path).await;
                (path, result)
            })
            .buffer_unordered(self.config.pipeline.concurrency.max(1));

        while let Some((path, result)) = inspections.next().await {
            let previous = self.catalog.source_file_by_path(&path)?;
            let record = match result {
                Ok(inspection) => {
                    let mut file = inspection.source_file;
                    file.identifier =
                        identify(&file.extracted, inspection.content_sample.as_deref());
                    debug!(
                        path = %path.display(),
                        format = ?file.format,
                        identifier = ?file.identifier.as_ref().map(|i| i.value.as_str()),
                        "Inspected"
                    );
                    file
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Inspection failed");
                    e.into_failed_record()
                }
            };

            let known = previous
                .as_ref()
                .is_some_and(|p| p.checksums.sha256 == record.checksums.sha256);
            let stored = self.catalog.record_source_file(&record)?;
            if known {
                summary.known += 1;
            } else if stored.status == SourceStatus::Failed {
                summary.failed += 1;
            } else {
                summary.recorded += 1;
            }
        }

        summary.duplicates = self.group_identical_copies()?;

        info!(
            recorded = summary.recorded,
            known = summary.known,
            failed = summary.failed,
            duplicates = summary.duplicates,
            "Scan complete"
        );
        Ok(summary)
    }

    /// Re-inspects recorded files at their intake paths.
    ///
    /// A file that now inspects cleanly gets fresh metadata and identifier
    /// and goes (back) to `pending`; one that still fails keeps `failed`
    /// with the new reason. Files in an open review are left alone, as are
    /// files whose bytes changed since they were recorded.
    pub async fn rescan(&self, options: RescanOptions) -> Result<RescanSummary, PipelineError> {
        let candidates = self.rescan_candidates(&options)?;
        let mut summary = RescanSummary {
            examined: candidates.len(),
            ..Default::default()
        };
        info!(files = candidates.len(), statuses = ?options.statuses, "Rescanning");

        let mut inspections = stream::iter(candidates)
            .map(|file| async move {
                let result = if file.path.exists() {
                    Some(inspect(&file.path).await)
                } else {
                    None
                };
                (file, result)
            })
            .buffer_unordered(self.config.pipeline.concurrency.max(1));

        while let Some((file, result)) = inspections.next().await {
            let Some(id) = file.id else {
                continue;
            };
            let Some(result) = result else {
                warn!(path = %file.path.display(), "Recorded file is gone");
                summary.missing += 1;
                continue;
            };
            let mut fresh = match result {
                Ok(inspection) => {
                    let mut fresh = inspection.source_file;
                    fresh.identifier =
                        identify(&fresh.extracted, inspection.content_sample.as_deref());
                    fresh
                }
                Err(e) => {
                    debug!(path = %file.path.display(), error = %e, "Still not inspectable");
                    e.into_failed_record()
                }
            };
            if fresh.checksums.sha256.is_empty() {
                fresh.checksums = file.checksums.clone();
                fresh.size_bytes = file.size_bytes;
            }

            let recorded = &file.checksums.sha256;
            if !recorded.is_empty()
                && !fresh.checksums.sha256.is_empty()
                && fresh.checksums.sha256 != *recorded
            {
                info!(path = %file.path.display(), "Content changed since it was recorded");
                summary.changed += 1;
                continue;
            }

            match self.catalog.update_inspection(id, &fresh) {
                Ok(()) => {}
                // The new bytes are already recorded under this path.
                Err(CatalogError::Conflict(_)) => {
                    summary.changed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            if fresh.status == SourceStatus::Failed {
                summary.failed += 1;
            } else {
                summary.updated += 1;
                if file.status == SourceStatus::Failed {
                    summary.recovered += 1;
                }
            }
        }

        summary.duplicates = self.group_identical_copies()?;
        info!(
            updated = summary.updated,
            recovered = summary.recovered,
            failed = summary.failed,
            changed = summary.changed,
            missing = summary.missing,
            "Rescan complete"
        );
        Ok(summary)
    }

    fn rescan_candidates(&self, options: &RescanOptions) -> Result<Vec<SourceFile>, PipelineError> {
        const PAGE: i64 = 200;
        let mut candidates = Vec::new();
        for status in &options.statuses {
            let mut offset = 0;
            loop {
                let mut filter = SourceFileFilter::new()
                    .with_status(*status)
                    .with_in_review(false)
                    .with_limit(PAGE)
                    .with_offset(offset);
                if let Some(format) = options.format {
                    filter = filter.with_format(format);
                }
                let page = self.catalog.list_source_files(&filter)?;
                let exhausted = (page.len() as i64) < PAGE;
                offset += page.len() as i64;
                candidates.extend(page);
                if exhausted {
                    break;
                }
            }
        }
        if let Some(limit) = options.limit {
            candidates.truncate(limit);
        }
        Ok(candidates)
    }

    /// Keeps the best of each set of identical pending copies and marks the
    /// others its duplicates. Returns how many were set aside.
    fn group_identical_copies(&self) -> Result<usize, PipelineError> {
        let mut grouped = 0;
        for sha256 in self.catalog.checksums_with_copies()? {
            let group = self
                .catalog
                .list_source_files(&SourceFileFilter::workable().with_sha256(sha256.as_str()))?;
            let Some(primary) = copies::best_copy(&group) else {
                continue;
            };
            let Some(primary_id) = primary.id else {
                continue;
            };
            for copy in &group {
                let Some(copy_id) = copy.id.filter(|id| *id != primary_id) else {
                    continue;
                };
                self.catalog.mark_duplicate_of(copy_id, primary_id)?;
                debug!(
                    path = %copy.path.display(),
                    kept = %primary.path.display(),
                    "Identical copy set aside"
                );
                grouped += 1;
            }
        }
        if grouped > 0 {
            info!(count = grouped, "Grouped identical intake copies");
        }
        Ok(grouped)
    }

    /// Processes pending files until none are left, `limit` is reached or
    /// `cancel` is raised.
    pub async fn run(
        &self,
        options: RunOptions,
        cancel: CancellationFlag,
    ) -> Result<RunSummary, PipelineError> {
        let batch_size = options
            .batch_size
            .unwrap_or(self.config.pipeline.batch_size)
            .max(1);
        let dry_run = options.dry_run;
        let semaphore = Semaphore::new(self.config.pipeline.concurrency.max(1));
        let mut summary = RunSummary::default();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut offset = 0usize;

        info!(
            batch_size,
            limit = ?options.limit,
            dry_run,
            "Run starting"
        );

        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let wanted = match options.limit {
                Some(limit) if summary.total >= limit => break,
                Some(limit) => batch_size.min(limit - summary.total),
                None => batch_size,
            };

            let filter = SourceFileFilter::workable()
                .with_limit(wanted as i64)
                .with_offset(offset as i64);
            let batch: Vec<SourceFile> = self
                .catalog
                .list_source_files(&filter)?
                .into_iter()
                .filter(|f| f.id.is_some_and(|id| seen.insert(id)))
                .collect();
            if batch.is_empty() {
                break;
            }
            debug!(files = batch.len(), offset, "Batch");

            let mut in_flight: FuturesUnordered<_> = batch
                .into_iter()
                .map(|file| {
                    let semaphore = &semaphore;
                    let cancel = &cancel;
                    async move {
                        let Ok(_permit) = semaphore.acquire().await else {
                            return self.untouched(&file, "semaphore closed");
                        };
                        if cancel.is_cancelled() {
                            return self.untouched(&file, "cancelled");
                        }
                        self.process(file, dry_run).await
                    }
                })
                .collect();

            while let Some(outcome) = in_flight.next().await {
                // A dry run changes no status, so every file stays workable.
                if dry_run || outcome.disposition.leaves_workable() {
                    offset += 1;
                }
                summary.record(outcome);
            }
        }

        if cancel.is_cancelled() {
            summary.cancelled = true;
        }
        info!(
            total = summary.total,
            migrated = summary.migrated,
            duplicate = summary.duplicate,
            needs_review = summary.needs_review,
            failed = summary.failed,
            deferred = summary.deferred,
            cancelled = summary.cancelled,
            "Run complete"
        );
        Ok(summary)
    }

    /// Re-runs lookups for a held file with a reviewer's hint.
    pub async fn retry_review(&self, id: i64, hint: &Hint) -> Result<ReviewEntry, PipelineError> {
        Ok(self.review.resume_with_hint(id, hint, self).await?)
    }

    /// Files a held file with its current metadata at full confidence.
    pub async fn force_review(&self, id: i64) -> Result<ReviewEntry, PipelineError> {
        Ok(self.review.force_file(id, self).await?)
    }

    pub async fn close_review(
        &self,
        id: i64,
        decision: TerminalDecision,
    ) -> Result<ReviewEntry, PipelineError> {
        Ok(self.review.mark_terminal(id, decision).await?)
    }

    fn untouched(&self, file: &SourceFile, reason: &str) -> FileOutcome {
        FileOutcome {
            source_file_id: file.id.unwrap_or_default(),
            path: file.path.clone(),
            disposition: Disposition::Skipped {
                reason: reason.to_string(),
            },
        }
    }

    async fn process(&self, file: SourceFile, dry_run: bool) -> FileOutcome {
        let id = file.id.unwrap_or_default();
        let path = file.path.clone();
        let disposition = match self.process_inner(&file, dry_run).await {
            Ok(disposition) => disposition,
            Err(e) => {
                let message = e.to_string();
                let (status, disposition) = if e.is_retryable() {
                    warn!(path = %path.display(), error = %e, "Filing deferred to the next run");
                    (
                        SourceStatus::Pending,
                        Disposition::Deferred {
                            error: message.clone(),
                        },
                    )
                } else {
                    warn!(path = %path.display(), error = %e, "Processing failed");
                    (
                        SourceStatus::Failed,
                        Disposition::Failed {
                            error: message.clone(),
                        },
                    )
                };
                if !dry_run {
                    if let Err(status_err) =
                        self.catalog
                            .update_source_status(id, status, Some(&message), None)
                    {
                        warn!(
                            path = %path.display(),
                            error = %status_err,
                            "Could not record failure"
                        );
                    }
                }
                disposition
            }
        };
        FileOutcome {
            source_file_id: id,
            path,
            disposition,
        }
    }

    async fn process_inner(
        &self,
        file: &SourceFile,
        dry_run: bool,
    ) -> Result<Disposition, PipelineError> {
        let id = file.id.ok_or_else(|| FilerError::NotRecorded {
            path: file.path.clone(),
        })?;
        if !dry_run {
            self.catalog
                .update_source_status(id, SourceStatus::Processing, None, None)?;
        }

        // A checksum already in the catalog needs no lookups.
        if dry_run {
            if let Some(item) = self.catalog.find_by_checksum(&file.checksums.sha256)? {
                return Ok(Disposition::Duplicate { item_id: item.id });
            }
        } else {
            match self.filer.resolve_duplicate(file).await {
                Ok(Some(filed)) => {
                    return Ok(Disposition::Migrated {
                        item_id: filed.item_id,
                        target: filed.target,
                        new_item: filed.new_item,
                    })
                }
                Ok(None) => {}
                Err(FilerError::DuplicateDetected { item_id, .. }) => {
                    return Ok(Disposition::Duplicate { item_id })
                }
                Err(e) => return Err(e.into()),
            }
        }

        let query = file.identifier.as_ref().map(identifier_query);
        let outcome = self.enricher.enrich(query, &file.extracted, None).await;
        let mut merged = outcome.merged;
        if let Some(identifier) = &file.identifier {
            fill_identifier(&mut merged, identifier);
        }
        let classification = self.classifier.classify(&merged, &outcome.hints);
        let threshold = self.config.pipeline.confidence_threshold;

        debug!(
            path = %file.path.display(),
            classification = %classification.describe(),
            failed_sources = ?outcome.failed_sources,
            "Classified"
        );

        if !classification.meets(threshold) {
            let note = (!outcome.failed_sources.is_empty())
                .then(|| format!("sources unavailable: {:?}", outcome.failed_sources));
            return self
                .hold(
                    file,
                    ReviewReason::LowConfidence,
                    merged,
                    outcome.hints,
                    classification,
                    note,
                    dry_run,
                )
                .await;
        }

        if dry_run {
            let plan = self.filer.plan(file, &merged, &classification)?;
            return Ok(Disposition::Planned {
                target: plan.target,
            });
        }

        match self.filer.file(file, &merged, &classification).await {
            Ok(filed) => Ok(Disposition::Migrated {
                item_id: filed.item_id,
                target: filed.target,
                new_item: filed.new_item,
            }),
            Err(FilerError::DuplicateDetected { item_id, .. }) => {
                Ok(Disposition::Duplicate { item_id })
            }
            Err(FilerError::FilingConflict { target }) => {
                let note = format!("target exists with different content: {}", target.display());
                self.hold(
                    file,
                    ReviewReason::FilingConflict,
                    merged,
                    outcome.hints,
                    classification,
                    Some(note),
                    false,
                )
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues the file for review and returns it to `pending`.
    #[allow(clippy::too_many_arguments)]
    async fn hold(
        &self,
        file: &SourceFile,
        reason: ReviewReason,
        merged: MergedMetadata,
        hints: Vec<ClassificationHint>,
        classification: ClassificationResult,
        note: Option<String>,
        dry_run: bool,
    ) -> Result<Disposition, PipelineError> {
        let confidence = classification.confidence;
        let id = file.id.unwrap_or_default();
        if dry_run {
            return Ok(Disposition::NeedsReview {
                review_id: None,
                reason,
                confidence,
            });
        }

        let entry = self
            .review
            .enqueue(NewReview {
                source_file_id: id,
                reason,
                merged,
                hints,
                classification,
                note,
            })
            .await?;
        self.catalog
            .update_source_status(id, SourceStatus::Pending, None, None)?;

        Ok(Disposition::NeedsReview {
            review_id: Some(entry.id),
            reason,
            confidence,
        })
    }

    fn source_for(&self, entry: &ReviewEntry) -> Result<SourceFile, ReviewError> {
        self.catalog
            .get_source_file(entry.source_file_id)?
            .ok_or_else(|| {
                ReviewError::Store(CatalogError::NotFound(format!(
                    "source file {}",
                    entry.source_file_id
                )))
            })
    }
}

#[async_trait]
impl ReviewResolver for Pipeline {
    fn threshold(&self) -> f32 {
        self.config.pipeline.confidence_threshold
    }

    async fn reassess(
        &self,
        entry: &ReviewEntry,
        hint: &Hint,
    ) -> Result<Reassessment, ReviewError> {
        let source = self.source_for(entry)?;

        let (query, manual) = match hint {
            Hint::Isbn { isbn } => {
                let identifier = Identifier::parse(isbn, IdentifierOrigin::Manual)
                    .ok_or_else(|| ReviewError::Resolve(format!("not a valid ISBN: {}", isbn)))?;
                let mut manual = EnrichmentCandidate::new(SourceTag::Manual);
                if let Some(isbn13) = identifier.isbn13() {
                    manual = manual.with_identifier("isbn_13", isbn13);
                }
                if let Some(isbn10) = identifier.isbn10() {
                    manual = manual.with_identifier("isbn_10", isbn10);
                }
                (identifier_query(&identifier), manual)
            }
            Hint::TitleAuthor { title, author } => {
                let mut manual = EnrichmentCandidate::new(SourceTag::Manual).with_title(title);
                if let Some(author) = author {
                    manual = manual.with_authors(vec![author.as_str()]);
                }
                (LookupQuery::title_author(title, author.clone()), manual)
            }
        };

        info!(review_id = entry.id, query = %query, "Re-running lookups");
        let outcome = self
            .enricher
            .enrich(Some(query), &source.extracted, Some(manual))
            .await;
        let mut merged = outcome.merged;
        if let Some(identifier) = &source.identifier {
            fill_identifier(&mut merged, identifier);
        }
        let classification = self.classifier.classify(&merged, &outcome.hints);

        Ok(Reassessment {
            merged,
            hints: outcome.hints,
            classification,
        })
    }

    async fn file(
        &self,
        entry: &ReviewEntry,
        merged: &MergedMetadata,
        classification: &ClassificationResult,
    ) -> Result<ReviewFiling, ReviewError> {
        let source = self.source_for(entry)?;
        match self.filer.file(&source, merged, classification).await {
            Ok(filed) => Ok(ReviewFiling::Filed {
                item_id: filed.item_id,
            }),
            Err(FilerError::DuplicateDetected { item_id, .. }) => {
                Ok(ReviewFiling::Duplicate { item_id })
            }
            Err(FilerError::FilingConflict { target }) => Ok(ReviewFiling::Conflict {
                target: target.display().to_string(),
            }),
            Err(e) => Err(ReviewError::Resolve(e.to_string())),
        }
    }
}

fn identifier_query(identifier: &Identifier) -> LookupQuery {
    LookupQuery::isbn(
        identifier
            .isbn13()
            .unwrap_or_else(|| identifier.value.clone()),
    )
}

/// Adds the file's own identifier when no source supplied one, so later
/// formats of the same book find this item.
fn fill_identifier(merged: &mut MergedMetadata, identifier: &Identifier) {
    if merged.isbn13().is_none() {
        if let Some(isbn13) = identifier.isbn13() {
            merged.identifiers.insert("isbn_13".to_string(), isbn13);
        }
    }
    if merged.isbn10().is_none() {
        if let Some(isbn10) = identifier.isbn10() {
            merged.identifiers.insert("isbn_10".to_string(), isbn10);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::identifier::IdentifierKind;
    use crate::review::ReviewState;
    use crate::testing::fixtures::{self, EpubSpec};
    use crate::testing::MockMetadataSource;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        config: Config,
        store: Arc<SqliteCatalogStore>,
        oclc: Arc<MockMetadataSource>,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let config = Config::new(LibraryConfig::new(temp.path().to_path_buf()));
            std::fs::create_dir_all(config.library.returns_root()).unwrap();
            Self {
                _temp: temp,
                config,
                store: Arc::new(SqliteCatalogStore::in_memory().unwrap()),
                oclc: Arc::new(MockMetadataSource::new(SourceTag::Oclc)),
            }
        }

        fn pipeline(&self) -> Pipeline {
            let sources: Vec<Arc<dyn MetadataSource>> = vec![self.oclc.clone()];
            Pipeline::new(
                self.config.clone(),
                self.store.clone(),
                sources,
                Classifier::default(),
            )
        }

        fn intake_epub(&self, name: &str, spec: &EpubSpec) -> std::path::PathBuf {
            let path = self.config.library.returns_root().join(name);
            fixtures::write_epub(&path, spec);
            path
        }
    }

    #[test]
    fn test_fill_identifier_converts_forms() {
        let identifier = Identifier {
            value: "0132350882".to_string(),
            kind: IdentifierKind::Isbn10,
            origin: IdentifierOrigin::Embedded,
        };
        let mut merged = MergedMetadata::default();
        fill_identifier(&mut merged, &identifier);
        assert_eq!(merged.isbn13(), Some("9780132350884"));
        assert_eq!(merged.isbn10(), Some("0132350882"));
    }

    #[tokio::test]
    async fn test_scan_records_and_identifies() {
        let harness = Harness::new();
        harness.intake_epub(
            "clean.epub",
            &EpubSpec::new("Clean Code", &["Robert C. Martin"]).with_isbn("9780132350884"),
        );
        std::fs::write(
            harness.config.library.returns_root().join("notes.txt"),
            b"plain text",
        )
        .unwrap();

        let pipeline = harness.pipeline();
        let summary = pipeline.scan().await.unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.recorded, 1);
        assert_eq!(summary.failed, 1);

        let pending = harness
            .store
            .list_source_files(&SourceFileFilter::workable())
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].identifier.as_ref().map(|i| i.value.as_str()),
            Some("9780132350884")
        );

        let again = pipeline.scan().await.unwrap();
        assert_eq!(again.known, 2);
        assert_eq!(again.recorded, 0);
    }

    #[tokio::test]
    async fn test_low_confidence_goes_to_review() {
        let harness = Harness::new();
        harness.intake_epub(
            "dragons.epub",
            &EpubSpec::new("Dragon Song", &["A. Writer"]).with_subjects(&["Fantasy fiction"]),
        );

        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();
        let summary = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.needs_review, 1);
        let open = pipeline
            .review()
            .list(&crate::review::ReviewFilter::open())
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].state, ReviewState::Pending);
        assert_eq!(open[0].classification.code.as_deref(), Some("813"));

        // Held files are not picked up again.
        let rerun = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(rerun.total, 0);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let harness = Harness::new();
        let path = harness.intake_epub(
            "clean.epub",
            &EpubSpec::new("Clean Code", &["Robert C. Martin"]).with_isbn("9780132350884"),
        );
        harness
            .oclc
            .add_isbn(
                "9780132350884",
                EnrichmentCandidate::new(SourceTag::Oclc).with_classification("005.1"),
            )
            .await;

        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();
        let summary = pipeline
            .run(RunOptions::new().dry_run(), CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.planned, 1);
        assert!(path.exists());
        assert_eq!(pipeline.stats().unwrap().items, 0);
        match &summary.outcomes[0].disposition {
            Disposition::Planned { target } => {
                assert!(target.ends_with("Robert C. Martin - Clean Code.epub"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blocked_move_leaves_file_pending() {
        let harness = Harness::new();
        let path = harness.intake_epub(
            "clean.epub",
            &EpubSpec::new("Clean Code", &["Robert C. Martin"]).with_isbn("9780132350884"),
        );
        harness
            .oclc
            .add_isbn(
                "9780132350884",
                EnrichmentCandidate::new(SourceTag::Oclc).with_classification("005.1"),
            )
            .await;
        // A plain file where the shelf directory should be.
        let blocker = harness.config.library.root.join("Non-Fiction");
        std::fs::write(&blocker, b"in the way").unwrap();

        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();
        let summary = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.deferred, 1, "outcomes: {:?}", summary.outcomes);
        assert_eq!(summary.failed, 0);
        assert!(path.exists());
        let record = harness
            .store
            .source_file_by_path(&path)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SourceStatus::Pending);
        assert!(record.error.is_some());

        std::fs::remove_file(&blocker).unwrap();
        let retry = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(retry.migrated, 1, "outcomes: {:?}", retry.outcomes);
        let record = harness
            .store
            .get_source_file(record.id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SourceStatus::Migrated);
        assert_eq!(record.error, None);
    }

    #[tokio::test]
    async fn test_known_checksum_skips_lookups() {
        let harness = Harness::new();
        let path = harness.intake_epub(
            "a.epub",
            &EpubSpec::new("Clean Code", &["Robert C. Martin"]).with_isbn("9780132350884"),
        );
        let backup = harness.config.library.root.join("backup.epub");
        std::fs::copy(&path, &backup).unwrap();
        harness
            .oclc
            .add_isbn(
                "9780132350884",
                EnrichmentCandidate::new(SourceTag::Oclc).with_classification("005.1"),
            )
            .await;

        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();
        let first = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(first.migrated, 1);

        // Same bytes again while the authority is down.
        harness
            .oclc
            .fail_always(|| SourceError::Server { status: 503 })
            .await;
        let lookups = harness.oclc.lookup_count().await;
        let copy = harness.config.library.returns_root().join("b.epub");
        std::fs::copy(&backup, &copy).unwrap();

        pipeline.scan().await.unwrap();
        let second = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(second.duplicate, 1, "outcomes: {:?}", second.outcomes);
        assert_eq!(second.needs_review, 0);
        assert_eq!(harness.oclc.lookup_count().await, lookups);
        assert!(!copy.exists());
        let open = pipeline
            .review()
            .list(&crate::review::ReviewFilter::open())
            .unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_scan_groups_identical_copies() {
        let harness = Harness::new();
        let long = harness.intake_epub(
            "clean code - some upload.epub",
            &EpubSpec::new("Clean Code", &["Robert C. Martin"]).with_isbn("9780132350884"),
        );
        let short = harness.config.library.returns_root().join("cc.epub");
        std::fs::copy(&long, &short).unwrap();
        harness
            .oclc
            .add_isbn(
                "9780132350884",
                EnrichmentCandidate::new(SourceTag::Oclc).with_classification("005.1"),
            )
            .await;

        let pipeline = harness.pipeline();
        let scan = pipeline.scan().await.unwrap();
        assert_eq!(scan.recorded, 2);
        assert_eq!(scan.duplicates, 1);

        let workable = harness
            .store
            .list_source_files(&SourceFileFilter::workable())
            .unwrap();
        assert_eq!(workable.len(), 1);
        assert_eq!(workable[0].path, short);
        let set_aside = harness.store.source_file_by_path(&long).unwrap().unwrap();
        assert_eq!(set_aside.status, SourceStatus::Duplicate);
        assert_eq!(set_aside.duplicate_of, workable[0].id);

        let summary = pipeline
            .run(RunOptions::new(), CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.migrated, 1);

        let set_aside = harness
            .store
            .get_source_file(set_aside.id.unwrap())
            .unwrap()
            .unwrap();
        assert!(set_aside.item_id.is_some());
        assert!(!long.exists());
        assert_eq!(pipeline.stats().unwrap().files, 1);
    }

    #[tokio::test]
    async fn test_rescan_returns_failed_files_to_pending() {
        let harness = Harness::new();
        let path = harness.intake_epub(
            "clean.epub",
            &EpubSpec::new("Clean Code", &["Robert C. Martin"]).with_isbn("9780132350884"),
        );
        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();
        let id = harness
            .store
            .source_file_by_path(&path)
            .unwrap()
            .and_then(|f| f.id)
            .unwrap();
        harness
            .store
            .update_source_status(id, SourceStatus::Failed, Some("source vanished"), None)
            .unwrap();

        // Different bytes under a failed path are left for scan.
        let swapped = harness.config.library.returns_root().join("notes.txt");
        std::fs::write(&swapped, b"plain text").unwrap();
        pipeline.scan().await.unwrap();
        std::fs::write(&swapped, b"other text").unwrap();

        let summary = pipeline.rescan(RescanOptions::failed()).await.unwrap();
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.changed, 1);

        let record = harness.store.get_source_file(id).unwrap().unwrap();
        assert_eq!(record.status, SourceStatus::Pending);
        assert_eq!(record.error, None);
        assert_eq!(
            record.identifier.as_ref().map(|i| i.value.as_str()),
            Some("9780132350884")
        );

        std::fs::remove_file(&path).unwrap();
        let pending = pipeline
            .rescan(RescanOptions::failed().with_statuses(vec![SourceStatus::Pending]))
            .await
            .unwrap();
        assert_eq!(pending.missing, 1);
    }

    #[tokio::test]
    async fn test_rescan_keeps_unsupported_files_failed() {
        let harness = Harness::new();
        std::fs::write(
            harness.config.library.returns_root().join("readme.txt"),
            b"not a book",
        )
        .unwrap();
        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();

        let summary = pipeline
            .rescan(RescanOptions::failed().with_limit(5))
            .await
            .unwrap();
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.updated, 0);
        let failed = harness
            .store
            .list_source_files(&SourceFileFilter::new().with_status(SourceStatus::Failed))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(!failed[0].checksums.sha256.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_processes_nothing() {
        let harness = Harness::new();
        harness.intake_epub("a.epub", &EpubSpec::new("A", &["B"]));
        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let summary = pipeline.run(RunOptions::new(), cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn test_limit_caps_files() {
        let harness = Harness::new();
        for name in ["a", "b", "c"] {
            harness.intake_epub(
                &format!("{}.epub", name),
                &EpubSpec::new(name, &["Someone"]).with_subjects(&["Fantasy fiction"]),
            );
        }
        let pipeline = harness.pipeline();
        pipeline.scan().await.unwrap();

        let summary = pipeline
            .run(
                RunOptions::new().with_limit(2).with_batch_size(1),
                CancellationFlag::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
    }
}
