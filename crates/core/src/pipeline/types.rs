use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::inspector::{BookFormat, SourceStatus};
use crate::review::ReviewReason;

/// Options for one `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many files.
    pub limit: Option<usize>,
    /// Overrides `pipeline.batch_size`.
    pub batch_size: Option<usize>,
    /// Plan targets without moving files or writing the catalog.
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Shared stop signal, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one file during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Disposition {
    Migrated {
        item_id: i64,
        target: PathBuf,
        new_item: bool,
    },
    Duplicate {
        item_id: i64,
    },
    NeedsReview {
        /// `None` in a dry run, where nothing is queued.
        review_id: Option<i64>,
        reason: ReviewReason,
        confidence: f32,
    },
    Failed {
        error: String,
    },
    /// Filing hit an I/O or catalog error. The file is back in `pending`
    /// with the error recorded and is retried by the next run.
    Deferred {
        error: String,
    },
    /// Dry run only.
    Planned {
        target: PathBuf,
    },
    /// Left untouched, e.g. after cancellation.
    Skipped {
        reason: String,
    },
}

impl Disposition {
    /// The file is still pending without an open review afterwards.
    pub(crate) fn leaves_workable(&self) -> bool {
        matches!(
            self,
            Disposition::Planned { .. } | Disposition::Skipped { .. } | Disposition::Deferred { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub source_file_id: i64,
    pub path: PathBuf,
    #[serde(flatten)]
    pub disposition: Disposition,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub migrated: usize,
    pub duplicate: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub planned: usize,
    pub cancelled: bool,
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    pub(crate) fn record(&mut self, outcome: FileOutcome) {
        self.total += 1;
        match &outcome.disposition {
            Disposition::Migrated { .. } => self.migrated += 1,
            Disposition::Duplicate { .. } => self.duplicate += 1,
            Disposition::NeedsReview { .. } => self.needs_review += 1,
            Disposition::Failed { .. } => self.failed += 1,
            Disposition::Deferred { .. } => self.deferred += 1,
            Disposition::Planned { .. } => self.planned += 1,
            Disposition::Skipped { .. } => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Totals for one `scan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Candidate files found under the intake area.
    pub discovered: usize,
    /// Newly recorded as pending.
    pub recorded: usize,
    /// Already recorded with the same content.
    pub known: usize,
    /// Recorded as failed (unreadable or unsupported).
    pub failed: usize,
    /// Rows left in `processing` by an interrupted run, reset to pending.
    pub reset: usize,
    /// Identical pending copies set aside in favor of one of them.
    pub duplicates: usize,
}

/// Options for one `rescan`.
#[derive(Debug, Clone, PartialEq)]
pub struct RescanOptions {
    /// Statuses to re-inspect: `failed`, `pending` or both.
    pub statuses: Vec<SourceStatus>,
    pub format: Option<BookFormat>,
    pub limit: Option<usize>,
}

impl RescanOptions {
    /// Files that failed inspection or processing.
    pub fn failed() -> Self {
        Self {
            statuses: vec![SourceStatus::Failed],
            format: None,
            limit: None,
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<SourceStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_format(mut self, format: BookFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for RescanOptions {
    fn default() -> Self {
        Self::failed()
    }
}

/// Totals for one `rescan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RescanSummary {
    pub examined: usize,
    /// Inspected cleanly; the record now holds fresh findings.
    pub updated: usize,
    /// Of `updated`, files that were `failed` and are `pending` again.
    pub recovered: usize,
    /// Still unreadable or unsupported.
    pub failed: usize,
    /// Different bytes at the path now. Left for `scan` to record.
    pub changed: usize,
    /// No longer at the recorded path.
    pub missing: usize,
    /// Identical pending copies set aside afterwards.
    pub duplicates: usize,
}
