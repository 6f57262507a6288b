//! Filer: canonical placement of a confidently classified file and the
//! catalog write that goes with it.
//!
//! Order of work for one file:
//!
//! 1. take the per-checksum lock, so identical files are filed one at a time
//! 2. look the checksum up in the catalog; a hit is a duplicate
//! 3. compute the target; an occupied target with other content is a conflict
//! 4. journal the target on the source record, then move
//! 5. write the catalog; on failure move the file back
//!
//! A run that died between 4 and 5 leaves the journal behind. The next
//! attempt finds the file at the journaled path, checks its digest and
//! finishes the catalog write.
//!
//! [`Filer::resolve_duplicate`] runs step 2 on its own, so the pipeline can
//! settle a known checksum before spending any lookups on it. Intake copies
//! grouped under a file at scan time follow it: once it is filed or found
//! to be a duplicate, they are linked to the same item and removed.

mod naming;
mod placement;

pub use naming::{
    canonical_name, canonical_stem, code_range_folder, format_author, plan_target,
    relative_to_root, sanitize_component, FilingPlan, MAX_NAME_CHARS,
};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogItem, CatalogStore, FileRef, SourceFileFilter};
use crate::classifier::ClassificationResult;
use crate::config::{Config, LibraryConfig};
use crate::enricher::MergedMetadata;
use crate::inspector::{sha256_file, SourceFile, SourceStatus};
use crate::locks::KeyedLocks;
use placement::RollbackPlan;

#[derive(Debug, Error)]
pub enum FilerError {
    /// The checksum is already in the library. The source is marked
    /// `duplicate` and linked to `item_id`.
    #[error("Duplicate of catalog item {item_id} (sha256 {sha256})")]
    DuplicateDetected { item_id: i64, sha256: String },

    /// The target exists with different content. Nothing was moved.
    #[error("Target already exists with different content: {}", target.display())]
    FilingConflict { target: PathBuf },

    #[error("Source file has not been recorded: {}", path.display())]
    NotRecorded { path: PathBuf },

    #[error("Source file has no detected format: {}", path.display())]
    UnknownFormat { path: PathBuf },

    #[error("Source file is gone: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("Failed to move {} to {}: {error}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The catalog write failed and the file could not be moved back. It
    /// stays at `placed`, journaled on the source record.
    #[error("Rollback failed, file left at {}: {reason}", placed.display())]
    RollbackFailed { placed: PathBuf, reason: String },
}

impl FilerError {
    pub(crate) fn move_failed(from: &Path, to: &Path, error: std::io::Error) -> Self {
        Self::MoveFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            error,
        }
    }

    /// Duplicates and conflicts are routing decisions, not failures.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDetected { .. } | Self::FilingConflict { .. }
        )
    }

    /// The file itself is fine and the move or catalog write may succeed
    /// on a later run. Everything here leaves the source at its intake
    /// path or at its journaled target.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::MoveFailed { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Catalog(_)
                | Self::RollbackFailed { .. }
        )
    }
}

/// A completed filing.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingOutcome {
    pub item_id: i64,
    pub target: PathBuf,
    /// A new catalog item was created, as opposed to a new format added
    /// to an existing one.
    pub new_item: bool,
    /// The file was found already in place from an interrupted run.
    pub recovered: bool,
}

/// Places files and records them in the catalog.
pub struct Filer {
    library: LibraryConfig,
    catalog: Arc<dyn CatalogStore>,
    verify_checksum: bool,
    in_flight: KeyedLocks<String>,
    /// Serializes find-or-create of items, so two formats of one book
    /// filed at once end up on the same item.
    item_writes: Mutex<()>,
}

impl Filer {
    pub fn new(library: LibraryConfig, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            library,
            catalog,
            verify_checksum: true,
            in_flight: KeyedLocks::new(),
            item_writes: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config, catalog: Arc<dyn CatalogStore>) -> Self {
        Self::new(config.library.clone(), catalog)
            .with_verify_checksum(config.pipeline.verify_checksum)
    }

    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn library(&self) -> &LibraryConfig {
        &self.library
    }

    /// Where `source` would be filed. Touches neither disk nor catalog.
    pub fn plan(
        &self,
        source: &SourceFile,
        merged: &MergedMetadata,
        classification: &ClassificationResult,
    ) -> Result<FilingPlan, FilerError> {
        let format = source.format.ok_or_else(|| FilerError::UnknownFormat {
            path: source.path.clone(),
        })?;
        Ok(plan_target(
            &self.library,
            merged,
            classification.code.as_deref(),
            classification.family.is_fiction(),
            format.extension(),
        ))
    }

    /// Settles `source` if its checksum is already in the catalog: a
    /// journaled filing is completed, anything else is a duplicate and
    /// comes back as [`FilerError::DuplicateDetected`]. `Ok(None)` means
    /// the checksum is new.
    pub async fn resolve_duplicate(
        &self,
        source: &SourceFile,
    ) -> Result<Option<FilingOutcome>, FilerError> {
        let id = source.id.ok_or_else(|| FilerError::NotRecorded {
            path: source.path.clone(),
        })?;
        let sha256 = source.checksums.sha256.clone();

        let _guard = self.in_flight.lock(sha256.clone()).await;

        let Some(existing) = self.catalog.find_by_checksum(&sha256)? else {
            return Ok(None);
        };
        let current = self
            .catalog
            .get_source_file(id)?
            .unwrap_or_else(|| source.clone());
        self.resolve_known_checksum(&current, existing)
            .await
            .map(Some)
    }

    /// Files `source` under its canonical name.
    pub async fn file(
        &self,
        source: &SourceFile,
        merged: &MergedMetadata,
        classification: &ClassificationResult,
    ) -> Result<FilingOutcome, FilerError> {
        let id = source.id.ok_or_else(|| FilerError::NotRecorded {
            path: source.path.clone(),
        })?;
        let sha256 = source.checksums.sha256.clone();

        let _guard = self.in_flight.lock(sha256.clone()).await;

        // The journal may have changed since the caller read the record.
        let current = self
            .catalog
            .get_source_file(id)?
            .unwrap_or_else(|| source.clone());
        let plan = self.plan(&current, merged, classification)?;

        if let Some(existing) = self.catalog.find_by_checksum(&sha256)? {
            return self.resolve_known_checksum(&current, existing).await;
        }

        let origin = self.locate_origin(&current).await?;

        if origin == plan.target {
            info!(target = %plan.target.display(), "File already in place, completing catalog write");
            let (item, new_item) = self.write_catalog(&current, merged, classification, &plan)?;
            return self
                .finish(&current, item.id, plan.target, new_item, true, &origin)
                .await;
        }

        let mut keep_origin_until_written = false;
        if plan.target.exists() {
            let existing = sha256_file(&plan.target)
                .await
                .map_err(|e| FilerError::Io {
                    path: plan.target.clone(),
                    source: e,
                })?;
            if existing != sha256 {
                warn!(
                    path = %current.path.display(),
                    target = %plan.target.display(),
                    "Filing conflict"
                );
                return Err(FilerError::FilingConflict {
                    target: plan.target,
                });
            }
            // Same bytes already at the target, e.g. a copy whose origin
            // survived a crash. Only the intake copy needs to go.
            keep_origin_until_written = true;
        }

        self.catalog.set_placed_path(id, Some(&plan.target))?;

        let mut rollback_plan = RollbackPlan::new();
        if !keep_origin_until_written {
            if let Err(e) = placement::move_file(
                &origin,
                &plan.target,
                &sha256,
                self.verify_checksum,
                &mut rollback_plan,
            )
            .await
            {
                self.catalog.set_placed_path(id, None)?;
                return Err(e);
            }
        }

        let (item, new_item) = match self.write_catalog(&current, merged, classification, &plan) {
            Ok(written) => written,
            Err(e) => {
                warn!(
                    target = %plan.target.display(),
                    error = %e,
                    "Catalog write failed, rolling back"
                );
                if let Err(errors) = placement::rollback(rollback_plan).await {
                    return Err(FilerError::RollbackFailed {
                        placed: plan.target,
                        reason: errors.join("; "),
                    });
                }
                self.catalog.set_placed_path(id, None)?;
                return Err(e);
            }
        };

        if keep_origin_until_written {
            self.remove_intake_copy(&origin, &sha256).await;
        }

        self.finish(&current, item.id, plan.target, new_item, false, &origin)
            .await
    }

    /// Status update and intake cleanup after a successful write.
    async fn finish(
        &self,
        source: &SourceFile,
        item_id: i64,
        target: PathBuf,
        new_item: bool,
        recovered: bool,
        origin: &Path,
    ) -> Result<FilingOutcome, FilerError> {
        if let Some(id) = source.id {
            self.catalog
                .update_source_status(id, SourceStatus::Migrated, None, Some(item_id))?;
        }
        info!(
            path = %source.path.display(),
            target = %target.display(),
            item_id,
            new_item,
            "Filed"
        );
        if let Some(dir) = origin.parent() {
            placement::prune_empty_dirs(dir, &self.library.returns_root()).await;
        }
        self.settle_copies(source, item_id).await;
        Ok(FilingOutcome {
            item_id,
            target,
            new_item,
            recovered,
        })
    }

    /// The checksum is in the catalog: either this very file was filed by
    /// an interrupted run, or it is a duplicate.
    async fn resolve_known_checksum(
        &self,
        source: &SourceFile,
        existing: CatalogItem,
    ) -> Result<FilingOutcome, FilerError> {
        let sha256 = &source.checksums.sha256;
        let id = source.id.unwrap_or_default();

        let filed_here = source.placed_path.as_ref().and_then(|placed| {
            let relative = relative_to_root(&self.library.root, placed)?;
            existing
                .files
                .iter()
                .any(|f| f.sha256 == *sha256 && f.path == relative)
                .then(|| placed.clone())
        });
        if let Some(placed) = filed_here {
            if source.path != placed {
                self.remove_intake_copy(&source.path, sha256).await;
            }
            let origin = source.path.clone();
            return self
                .finish(source, existing.id, placed, false, true, &origin)
                .await;
        }

        self.catalog.update_source_status(
            id,
            SourceStatus::Duplicate,
            None,
            Some(existing.id),
        )?;
        self.remove_intake_copy(&source.path, sha256).await;
        info!(
            path = %source.path.display(),
            checksum = %sha256,
            item_id = existing.id,
            "Duplicate of existing item"
        );
        self.settle_copies(source, existing.id).await;
        Err(FilerError::DuplicateDetected {
            item_id: existing.id,
            sha256: sha256.clone(),
        })
    }

    /// Links the copies grouped under `primary` to `item_id` and removes
    /// their intake files. Failures are logged; the primary's outcome
    /// stands either way.
    async fn settle_copies(&self, primary: &SourceFile, item_id: i64) {
        let Some(primary_id) = primary.id else {
            return;
        };
        let filter = SourceFileFilter::new()
            .with_status(SourceStatus::Duplicate)
            .with_duplicate_of(primary_id);
        let copies = match self.catalog.list_source_files(&filter) {
            Ok(copies) => copies,
            Err(e) => {
                warn!(path = %primary.path.display(), error = %e, "Could not list grouped copies");
                return;
            }
        };
        for copy in copies {
            let Some(copy_id) = copy.id else {
                continue;
            };
            if copy.item_id.is_none() {
                if let Err(e) = self.catalog.update_source_status(
                    copy_id,
                    SourceStatus::Duplicate,
                    None,
                    Some(item_id),
                ) {
                    warn!(path = %copy.path.display(), error = %e, "Could not link grouped copy");
                    continue;
                }
            }
            self.remove_intake_copy(&copy.path, &copy.checksums.sha256)
                .await;
            debug!(path = %copy.path.display(), item_id, "Grouped copy settled");
        }
    }

    /// The file to move: the intake path, or the journaled target when a
    /// previous attempt got the file there but not into the catalog.
    async fn locate_origin(&self, source: &SourceFile) -> Result<PathBuf, FilerError> {
        if source.path.exists() {
            return Ok(source.path.clone());
        }
        if let Some(placed) = &source.placed_path {
            if placed.exists() {
                let digest = sha256_file(placed).await.map_err(|e| FilerError::Io {
                    path: placed.clone(),
                    source: e,
                })?;
                if digest == source.checksums.sha256 {
                    debug!(placed = %placed.display(), "Recovering journaled placement");
                    return Ok(placed.clone());
                }
            }
        }
        Err(FilerError::SourceMissing {
            path: source.path.clone(),
        })
    }

    /// Reuses the item of another format of the same book, or creates one.
    fn write_catalog(
        &self,
        source: &SourceFile,
        merged: &MergedMetadata,
        classification: &ClassificationResult,
        plan: &FilingPlan,
    ) -> Result<(CatalogItem, bool), FilerError> {
        let format = source.format.ok_or_else(|| FilerError::UnknownFormat {
            path: source.path.clone(),
        })?;
        let file = FileRef {
            path: plan.relative.clone(),
            format,
            size_bytes: source.size_bytes,
            sha256: source.checksums.sha256.clone(),
            md5: source.checksums.md5.clone(),
        };

        let _writing = self.item_writes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = self.find_existing_item(merged)? {
            debug!(item_id = item.id, format = %format, "Adding format to existing item");
            return Ok((self.catalog.attach_file(item.id, file)?, false));
        }
        Ok((self.catalog.create_item(merged, classification, file)?, true))
    }

    fn find_existing_item(
        &self,
        merged: &MergedMetadata,
    ) -> Result<Option<CatalogItem>, CatalogError> {
        for isbn in [merged.isbn13(), merged.isbn10()].into_iter().flatten() {
            if let Some(item) = self.catalog.find_item_by_identifier(isbn)? {
                return Ok(Some(item));
            }
        }
        match merged.title.as_deref() {
            Some(title) => self
                .catalog
                .find_item_by_title_author(title, merged.first_author()),
            None => Ok(None),
        }
    }

    /// Deletes an intake file whose content is safe in the library. Checks
    /// the digest first; a file that changed since inspection is kept.
    async fn remove_intake_copy(&self, path: &Path, sha256: &str) {
        if !path.exists() {
            return;
        }
        // Only intake files are ever removed.
        if path.starts_with(&self.library.root) && !path.starts_with(self.library.returns_root())
        {
            return;
        }
        match sha256_file(path).await {
            Ok(digest) if digest == sha256 => {}
            Ok(_) => {
                warn!(path = %path.display(), "Intake file changed since inspection, keeping it");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read intake copy");
                return;
            }
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                if let Some(dir) = path.parent() {
                    placement::prune_empty_dirs(dir, &self.library.returns_root()).await;
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove intake copy"),
        }
    }
}
