//! Library catalog: the durable record of filed items and of every intake
//! file the pipeline has seen.
//!
//! The pipeline only touches persistence through [`CatalogStore`]. The
//! store is local and synchronous; callers on the async side keep their
//! critical sections short.

mod sqlite;
mod types;

pub(crate) use sqlite::parse_timestamp;
pub use sqlite::SqliteCatalogStore;
pub use types::*;

use std::path::Path;

use crate::classifier::ClassificationResult;
use crate::enricher::MergedMetadata;
use crate::inspector::{SourceFile, SourceStatus};

/// Storage for catalog items and source file records.
pub trait CatalogStore: Send + Sync {
    /// Item holding a library file with this SHA-256, if any.
    fn find_by_checksum(&self, sha256: &str) -> Result<Option<CatalogItem>, CatalogError>;

    /// Creates an item with its first file.
    ///
    /// Fails with [`CatalogError::Conflict`] when the file's checksum or
    /// path is already in the catalog.
    fn create_item(
        &self,
        metadata: &MergedMetadata,
        classification: &ClassificationResult,
        file: FileRef,
    ) -> Result<CatalogItem, CatalogError>;

    /// Adds another file to an existing item.
    fn attach_file(&self, item_id: i64, file: FileRef) -> Result<CatalogItem, CatalogError>;

    fn get_item(&self, id: i64) -> Result<Option<CatalogItem>, CatalogError>;

    /// Item carrying this ISBN-13 (or ISBN-10), for filing a second format
    /// of the same book under one item.
    fn find_item_by_identifier(&self, isbn: &str) -> Result<Option<CatalogItem>, CatalogError>;

    /// Item with this exact title and first author, case-insensitive.
    fn find_item_by_title_author(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<CatalogItem>, CatalogError>;

    /// Records an intake file. Idempotent on (path, sha256): recording the
    /// same file again returns the existing row untouched.
    fn record_source_file(&self, file: &SourceFile) -> Result<SourceFile, CatalogError>;

    fn get_source_file(&self, id: i64) -> Result<Option<SourceFile>, CatalogError>;

    /// Most recent record for an intake path.
    fn source_file_by_path(&self, path: &Path) -> Result<Option<SourceFile>, CatalogError>;

    fn update_source_status(
        &self,
        id: i64,
        status: SourceStatus,
        error: Option<&str>,
        item_id: Option<i64>,
    ) -> Result<(), CatalogError>;

    /// Sets or clears the filing journal for a source file.
    fn set_placed_path(&self, id: i64, placed: Option<&Path>) -> Result<(), CatalogError>;

    fn list_source_files(&self, filter: &SourceFileFilter)
        -> Result<Vec<SourceFile>, CatalogError>;

    /// Replaces what inspection found for a recorded file: checksums,
    /// format, size, extracted metadata, identifier, status and error.
    fn update_inspection(&self, id: i64, file: &SourceFile) -> Result<(), CatalogError>;

    /// Checksums shared by more than one workable pending row, oldest
    /// first.
    fn checksums_with_copies(&self) -> Result<Vec<String>, CatalogError>;

    /// Marks `id` a `duplicate` of the intake copy `primary_id`.
    fn mark_duplicate_of(&self, id: i64, primary_id: i64) -> Result<(), CatalogError>;

    /// Returns rows left in `processing` by an interrupted run to
    /// `pending`. Returns how many were reset.
    fn reset_processing(&self) -> Result<usize, CatalogError>;

    fn stats(&self) -> Result<CatalogStats, CatalogError>;
}
