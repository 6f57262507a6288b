//! Review entry storage.

use super::{NewReview, ReviewEntry, ReviewFilter};
use crate::catalog::CatalogError;

/// Persistence for review entries. The queue holds the state machine; the
/// store only reads and writes rows.
pub trait ReviewStore: Send + Sync {
    /// Creates a `pending` entry.
    fn insert_review(&self, review: NewReview) -> Result<ReviewEntry, CatalogError>;

    fn get_review(&self, id: i64) -> Result<Option<ReviewEntry>, CatalogError>;

    /// The open (`pending`/`searching`) entry for a source file, if any.
    fn open_review_for_source(
        &self,
        source_file_id: i64,
    ) -> Result<Option<ReviewEntry>, CatalogError>;

    fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<ReviewEntry>, CatalogError>;

    /// Case-insensitive match against title, authors, note and intake path.
    fn search_reviews(&self, text: &str, limit: i64) -> Result<Vec<ReviewEntry>, CatalogError>;

    /// Writes back every mutable field of `entry` and stamps `updated_at`.
    fn update_review(&self, entry: &ReviewEntry) -> Result<ReviewEntry, CatalogError>;
}
