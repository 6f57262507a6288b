//! Review queue: items the pipeline would not file on its own.
//!
//! Entries enter automatically (low confidence or a filing conflict) and
//! leave through a reviewer's decision. Every decision on an entry runs
//! under that entry's lock and checks [`ReviewState::can_transition_to`],
//! so a reviewer and an automated re-run cannot both move the same entry.
//!
//! Re-running lookups and filing are supplied by a [`ReviewResolver`]; the
//! queue itself knows nothing about sources or the library layout.

mod sqlite;
mod store;
mod types;

pub use store::ReviewStore;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{CatalogError, CatalogStore};
use crate::classifier::ClassificationResult;
use crate::enricher::{ClassificationHint, MergedMetadata};
use crate::inspector::SourceStatus;
use crate::locks::KeyedLocks;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Review entry not found: {0}")]
    NotFound(i64),

    #[error("Review entry {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: ReviewState,
        to: ReviewState,
    },

    #[error("Catalog item not found: {0}")]
    ItemNotFound(i64),

    #[error("Store error: {0}")]
    Store(#[from] CatalogError),

    /// Re-running lookups or filing failed; the entry went back to pending.
    #[error("Resolution failed: {0}")]
    Resolve(String),
}

/// Fresh lookup results for a held item.
#[derive(Debug, Clone)]
pub struct Reassessment {
    pub merged: MergedMetadata,
    pub hints: Vec<ClassificationHint>,
    pub classification: ClassificationResult,
}

/// What happened when a held item was sent to the filer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewFiling {
    Filed { item_id: i64 },
    Duplicate { item_id: i64 },
    /// The target is taken by different content; the entry stays open.
    Conflict { target: String },
}

/// Pipeline stages the queue calls back into.
#[async_trait]
pub trait ReviewResolver: Send + Sync {
    /// Threshold a reassessment must meet to be filed.
    fn threshold(&self) -> f32;

    /// Re-runs identification and enrichment with the reviewer's hint.
    async fn reassess(&self, entry: &ReviewEntry, hint: &Hint)
        -> Result<Reassessment, ReviewError>;

    /// Files the entry's source with the given metadata.
    async fn file(
        &self,
        entry: &ReviewEntry,
        merged: &MergedMetadata,
        classification: &ClassificationResult,
    ) -> Result<ReviewFiling, ReviewError>;
}

/// The review state machine over a [`ReviewStore`].
pub struct ReviewQueue {
    store: Arc<dyn ReviewStore>,
    catalog: Arc<dyn CatalogStore>,
    locks: KeyedLocks<i64>,
}

impl ReviewQueue {
    pub fn new(store: Arc<dyn ReviewStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            catalog,
            locks: KeyedLocks::new(),
        }
    }

    /// Holds a source file for review.
    ///
    /// A file already held gets its open entry refreshed instead of a
    /// second entry.
    pub async fn enqueue(&self, review: NewReview) -> Result<ReviewEntry, ReviewError> {
        if let Some(open) = self.store.open_review_for_source(review.source_file_id)? {
            let _guard = self.locks.lock(open.id).await;
            let mut entry = self.load(open.id)?;
            if entry.state.is_open() {
                entry.reason = review.reason;
                entry.merged = review.merged;
                entry.hints = review.hints;
                entry.classification = review.classification;
                entry.note = review.note;
                return Ok(self.store.update_review(&entry)?);
            }
        }

        let source_file_id = review.source_file_id;
        let reason = review.reason;
        let entry = self.store.insert_review(review)?;
        info!(
            review_id = entry.id,
            source_file_id,
            reason = %reason,
            classification = %entry.classification.describe(),
            "Queued for review"
        );
        Ok(entry)
    }

    pub fn get(&self, id: i64) -> Result<ReviewEntry, ReviewError> {
        self.load(id)
    }

    pub fn list(&self, filter: &ReviewFilter) -> Result<Vec<ReviewEntry>, ReviewError> {
        Ok(self.store.list_reviews(filter)?)
    }

    pub fn search(&self, text: &str) -> Result<Vec<ReviewEntry>, ReviewError> {
        Ok(self.store.search_reviews(text, 100)?)
    }

    /// Marks an entry as being worked on by a reviewer.
    pub async fn begin_search(&self, id: i64) -> Result<ReviewEntry, ReviewError> {
        let _guard = self.locks.lock(id).await;
        let entry = self.load(id)?;
        self.transition(entry, ReviewState::Searching)
    }

    /// Re-runs lookups with a corrected identifier or title/author and
    /// files the result if it now clears the threshold. Otherwise the
    /// entry returns to `pending` holding the fresh metadata.
    pub async fn resume_with_hint(
        &self,
        id: i64,
        hint: &Hint,
        resolver: &dyn ReviewResolver,
    ) -> Result<ReviewEntry, ReviewError> {
        let _guard = self.locks.lock(id).await;
        let mut entry = self.load(id)?;
        match entry.state {
            ReviewState::Pending => entry = self.transition(entry, ReviewState::Searching)?,
            ReviewState::Searching => {}
            from => {
                return Err(ReviewError::InvalidTransition {
                    id,
                    from,
                    to: ReviewState::Searching,
                })
            }
        }

        let reassessment = match resolver.reassess(&entry, hint).await {
            Ok(reassessment) => reassessment,
            Err(e) => {
                entry.note = Some(format!("{} failed: {}", hint, e));
                self.transition(entry, ReviewState::Pending)?;
                return Err(e);
            }
        };

        entry.merged = reassessment.merged;
        entry.hints = reassessment.hints;
        entry.classification = reassessment.classification;

        if !entry.classification.meets(resolver.threshold()) {
            entry.note = Some(format!(
                "{}: {}",
                hint,
                entry.classification.describe()
            ));
            info!(review_id = id, hint = %hint, "Still below threshold after hint");
            return self.transition(entry, ReviewState::Pending);
        }

        let merged = entry.merged.clone();
        let classification = entry.classification.clone();
        self.file_entry(entry, &merged, &classification, resolver)
            .await
    }

    /// Files the held metadata regardless of confidence.
    pub async fn force_file(
        &self,
        id: i64,
        resolver: &dyn ReviewResolver,
    ) -> Result<ReviewEntry, ReviewError> {
        let _guard = self.locks.lock(id).await;
        let entry = self.load(id)?;
        self.check(&entry, ReviewState::Filed)?;

        let merged = entry.merged.clone();
        let classification = entry.classification.clone().forced();
        info!(review_id = id, "Force filing");
        self.file_entry(entry, &merged, &classification, resolver)
            .await
    }

    /// Closes an entry as skipped or as a duplicate of an existing item.
    pub async fn mark_terminal(
        &self,
        id: i64,
        decision: TerminalDecision,
    ) -> Result<ReviewEntry, ReviewError> {
        let _guard = self.locks.lock(id).await;
        let mut entry = self.load(id)?;
        self.check(&entry, decision.state())?;

        match decision {
            TerminalDecision::Skipped => {
                self.catalog.update_source_status(
                    entry.source_file_id,
                    SourceStatus::Skipped,
                    None,
                    None,
                )?;
            }
            TerminalDecision::Duplicate { item_id } => {
                if self.catalog.get_item(item_id)?.is_none() {
                    return Err(ReviewError::ItemNotFound(item_id));
                }
                self.catalog.update_source_status(
                    entry.source_file_id,
                    SourceStatus::Duplicate,
                    None,
                    Some(item_id),
                )?;
                entry.item_id = Some(item_id);
            }
        }

        info!(review_id = id, state = %decision.state(), "Review closed");
        self.transition(entry, decision.state())
    }

    async fn file_entry(
        &self,
        mut entry: ReviewEntry,
        merged: &MergedMetadata,
        classification: &ClassificationResult,
        resolver: &dyn ReviewResolver,
    ) -> Result<ReviewEntry, ReviewError> {
        let id = entry.id;
        match resolver.file(&entry, merged, classification).await {
            Ok(ReviewFiling::Filed { item_id }) => {
                entry.item_id = Some(item_id);
                entry.classification = classification.clone();
                entry.note = None;
                self.transition(entry, ReviewState::Filed)
            }
            Ok(ReviewFiling::Duplicate { item_id }) => {
                entry.item_id = Some(item_id);
                self.transition(entry, ReviewState::Duplicate)
            }
            Ok(ReviewFiling::Conflict { target }) => {
                warn!(review_id = id, target = %target, "Filing conflict, entry stays open");
                entry.reason = ReviewReason::FilingConflict;
                entry.note = Some(format!("target exists with different content: {}", target));
                self.reopen(entry)
            }
            Err(e) => {
                entry.note = Some(format!("filing failed: {}", e));
                self.reopen(entry)?;
                Err(e)
            }
        }
    }

    /// Back to `pending`, or just persisted when already there.
    fn reopen(&self, entry: ReviewEntry) -> Result<ReviewEntry, ReviewError> {
        if entry.state == ReviewState::Pending {
            Ok(self.store.update_review(&entry)?)
        } else {
            self.transition(entry, ReviewState::Pending)
        }
    }

    fn load(&self, id: i64) -> Result<ReviewEntry, ReviewError> {
        self.store.get_review(id)?.ok_or(ReviewError::NotFound(id))
    }

    fn check(&self, entry: &ReviewEntry, to: ReviewState) -> Result<(), ReviewError> {
        if entry.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(ReviewError::InvalidTransition {
                id: entry.id,
                from: entry.state,
                to,
            })
        }
    }

    fn transition(
        &self,
        mut entry: ReviewEntry,
        to: ReviewState,
    ) -> Result<ReviewEntry, ReviewError> {
        self.check(&entry, to)?;
        entry.state = to;
        Ok(self.store.update_review(&entry)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FileRef, SqliteCatalogStore};
    use crate::classifier::{ClassificationMethod, ShelfFamily};
    use crate::inspector::{BookFormat, Checksums, ExtractedMetadata, SourceFile};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeResolver {
        confidence: f32,
        filing: ReviewFiling,
        filed: AtomicUsize,
    }

    impl FakeResolver {
        fn new(confidence: f32, filing: ReviewFiling) -> Self {
            Self {
                confidence,
                filing,
                filed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReviewResolver for FakeResolver {
        fn threshold(&self) -> f32 {
            0.8
        }

        async fn reassess(
            &self,
            entry: &ReviewEntry,
            hint: &Hint,
        ) -> Result<Reassessment, ReviewError> {
            let mut merged = entry.merged.clone();
            if let Hint::Isbn { isbn } = hint {
                merged.identifiers.insert("isbn_13".to_string(), isbn.clone());
            }
            Ok(Reassessment {
                merged,
                hints: Vec::new(),
                classification: ClassificationResult {
                    code: Some("813".to_string()),
                    confidence: self.confidence,
                    method: ClassificationMethod::Hinted,
                    family: ShelfFamily::Fiction,
                    source: None,
                    matched_subject: None,
                },
            })
        }

        async fn file(
            &self,
            _entry: &ReviewEntry,
            _merged: &MergedMetadata,
            classification: &ClassificationResult,
        ) -> Result<ReviewFiling, ReviewError> {
            assert!(classification.meets(self.threshold()));
            self.filed.fetch_add(1, Ordering::SeqCst);
            Ok(self.filing.clone())
        }
    }

    fn setup() -> (Arc<SqliteCatalogStore>, ReviewQueue, i64) {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let source = store
            .record_source_file(&SourceFile::new(
                PathBuf::from("/in/book.epub"),
                Checksums {
                    sha256: "s".to_string(),
                    md5: "m".to_string(),
                },
                Some(BookFormat::Epub),
                1,
                ExtractedMetadata::default(),
            ))
            .unwrap();
        let queue = ReviewQueue::new(store.clone(), store.clone());
        (store, queue, source.id.unwrap())
    }

    fn low_confidence(source_file_id: i64) -> NewReview {
        NewReview {
            source_file_id,
            reason: ReviewReason::LowConfidence,
            merged: MergedMetadata {
                title: Some("Wizard".to_string()),
                ..Default::default()
            },
            hints: Vec::new(),
            classification: ClassificationResult {
                code: Some("813".to_string()),
                confidence: 0.6,
                method: ClassificationMethod::SubjectMapped,
                family: ShelfFamily::Fiction,
                source: None,
                matched_subject: Some("fantasy fiction".to_string()),
            },
            note: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_refreshes_open_entry() {
        let (_store, queue, source_id) = setup();
        let first = queue.enqueue(low_confidence(source_id)).await.unwrap();
        let mut again = low_confidence(source_id);
        again.note = Some("second pass".to_string());
        let second = queue.enqueue(again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.note.as_deref(), Some("second pass"));
        assert_eq!(queue.list(&ReviewFilter::open()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hint_below_threshold_returns_to_pending() {
        let (_store, queue, source_id) = setup();
        let entry = queue.enqueue(low_confidence(source_id)).await.unwrap();
        let resolver = FakeResolver::new(0.6, ReviewFiling::Filed { item_id: 1 });

        let entry = queue
            .resume_with_hint(entry.id, &Hint::isbn("9780553383041"), &resolver)
            .await
            .unwrap();
        assert_eq!(entry.state, ReviewState::Pending);
        assert_eq!(
            entry.merged.identifiers.get("isbn_13").map(String::as_str),
            Some("9780553383041")
        );
        assert!(entry.note.is_some());
        assert_eq!(resolver.filed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hint_above_threshold_files() {
        let (_store, queue, source_id) = setup();
        let entry = queue.enqueue(low_confidence(source_id)).await.unwrap();
        queue.begin_search(entry.id).await.unwrap();
        let resolver = FakeResolver::new(0.85, ReviewFiling::Filed { item_id: 7 });

        let entry = queue
            .resume_with_hint(entry.id, &Hint::title_author("Wizard", None), &resolver)
            .await
            .unwrap();
        assert_eq!(entry.state, ReviewState::Filed);
        assert_eq!(entry.item_id, Some(7));

        // Terminal: no further decisions.
        let err = queue.force_file(entry.id, &resolver).await.unwrap_err();
        assert!(matches!(err, ReviewError::InvalidTransition { .. }));
        let err = queue
            .mark_terminal(entry.id, TerminalDecision::Skipped)
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_force_file_overrides_confidence() {
        let (_store, queue, source_id) = setup();
        let entry = queue.enqueue(low_confidence(source_id)).await.unwrap();
        let resolver = FakeResolver::new(0.0, ReviewFiling::Filed { item_id: 3 });

        let entry = queue.force_file(entry.id, &resolver).await.unwrap();
        assert_eq!(entry.state, ReviewState::Filed);
        assert_eq!(entry.classification.confidence, 1.0);
        assert_eq!(resolver.filed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflict_keeps_entry_open() {
        let (_store, queue, source_id) = setup();
        let entry = queue.enqueue(low_confidence(source_id)).await.unwrap();
        let resolver = FakeResolver::new(
            1.0,
            ReviewFiling::Conflict {
                target: "Fiction/Wizard/Wizard.epub".to_string(),
            },
        );

        let entry = queue.force_file(entry.id, &resolver).await.unwrap();
        assert_eq!(entry.state, ReviewState::Pending);
        assert_eq!(entry.reason, ReviewReason::FilingConflict);
        assert!(entry.note.unwrap().contains("Fiction/Wizard/Wizard.epub"));
    }

    #[tokio::test]
    async fn test_mark_skipped_updates_source() {
        let (store, queue, source_id) = setup();
        let entry = queue.enqueue(low_confidence(source_id)).await.unwrap();

        let entry = queue
            .mark_terminal(entry.id, TerminalDecision::Skipped)
            .await
            .unwrap();
        assert_eq!(entry.state, ReviewState::Skipped);
        let source = store.get_source_file(source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Skipped);
    }

    #[tokio::test]
    async fn test_mark_duplicate_requires_item() {
        let (store, queue, source_id) = setup();
        let entry = queue.enqueue(low_confidence(source_id)).await.unwrap();

        let err = queue
            .mark_terminal(entry.id, TerminalDecision::Duplicate { item_id: 99 })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::ItemNotFound(99)));

        let item = store
            .create_item(
                &MergedMetadata {
                    title: Some("Wizard".to_string()),
                    ..Default::default()
                },
                &ClassificationResult::unclassified(ShelfFamily::Fiction),
                FileRef {
                    path: "Fiction/Wizard/Wizard.epub".to_string(),
                    format: BookFormat::Epub,
                    size_bytes: 1,
                    sha256: "other".to_string(),
                    md5: "m".to_string(),
                },
            )
            .unwrap();
        let entry = queue
            .mark_terminal(entry.id, TerminalDecision::Duplicate { item_id: item.id })
            .await
            .unwrap();
        assert_eq!(entry.state, ReviewState::Duplicate);
        let source = store.get_source_file(source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Duplicate);
        assert_eq!(source.item_id, Some(item.id));
        let item = store.get_item(item.id).unwrap().unwrap();
        assert_eq!(item.source_file_ids, vec![source_id]);
    }

    #[tokio::test]
    async fn test_unknown_entry() {
        let (_store, queue, _) = setup();
        assert!(matches!(queue.get(5), Err(ReviewError::NotFound(5))));
        assert!(matches!(
            queue.begin_search(5).await,
            Err(ReviewError::NotFound(5))
        ));
    }
}
