//! SQLite persistence for review entries, sharing the catalog database.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{NewReview, ReviewEntry, ReviewFilter, ReviewReason, ReviewState, ReviewStore};
use crate::catalog::{parse_timestamp, CatalogError, SqliteCatalogStore};

const REVIEW_COLUMNS: &str = "r.id, r.source_file_id, r.state, r.reason, r.merged, r.hints, \
     r.classification, r.note, r.item_id, r.created_at, r.updated_at";

fn row_to_review(row: &rusqlite::Row) -> rusqlite::Result<ReviewEntry> {
    let state_str: String = row.get(2)?;
    let reason_str: String = row.get(3)?;
    let merged_json: String = row.get(4)?;
    let hints_json: String = row.get(5)?;
    let classification_json: String = row.get(6)?;
    let created_at_str: String = row.get(9)?;
    let updated_at_str: String = row.get(10)?;

    let classification = serde_json::from_str(&classification_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ReviewEntry {
        id: row.get(0)?,
        source_file_id: row.get(1)?,
        state: ReviewState::parse(&state_str).unwrap_or(ReviewState::Pending),
        reason: ReviewReason::parse(&reason_str).unwrap_or(ReviewReason::LowConfidence),
        merged: serde_json::from_str(&merged_json).unwrap_or_default(),
        hints: serde_json::from_str(&hints_json).unwrap_or_default(),
        classification,
        note: row.get(7)?,
        item_id: row.get(8)?,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CatalogError> {
    serde_json::to_string(value).map_err(|e| CatalogError::Database(e.to_string()))
}

impl ReviewStore for SqliteCatalogStore {
    fn insert_review(&self, review: NewReview) -> Result<ReviewEntry, CatalogError> {
        let id = {
            let conn = self.lock()?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO review_entries (source_file_id, state, reason, merged, hints,
                    classification, note, item_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
                params![
                    review.source_file_id,
                    ReviewState::Pending.as_str(),
                    review.reason.as_str(),
                    to_json(&review.merged)?,
                    to_json(&review.hints)?,
                    to_json(&review.classification)?,
                    &review.note,
                    &now,
                    &now,
                ],
            )
            .map_err(|e| match CatalogError::from(e) {
                CatalogError::Conflict(_) => {
                    CatalogError::NotFound(format!("source file {}", review.source_file_id))
                }
                other => other,
            })?;
            conn.last_insert_rowid()
        };

        self.get_review(id)?
            .ok_or_else(|| CatalogError::NotFound(format!("review {}", id)))
    }

    fn get_review(&self, id: i64) -> Result<Option<ReviewEntry>, CatalogError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM review_entries r WHERE r.id = ?", REVIEW_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_review).optional()?)
    }

    fn open_review_for_source(
        &self,
        source_file_id: i64,
    ) -> Result<Option<ReviewEntry>, CatalogError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM review_entries r
             WHERE r.source_file_id = ? AND r.state IN ('pending', 'searching')
             ORDER BY r.id DESC LIMIT 1",
            REVIEW_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![source_file_id], row_to_review)
            .optional()?)
    }

    fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<ReviewEntry>, CatalogError> {
        let conn = self.lock()?;

        let mut conditions = Vec::new();
        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(state) = filter.state {
            conditions.push("r.state = ?");
            all_params.push(Box::new(state.as_str()));
        }
        if filter.open_only {
            conditions.push("r.state IN ('pending', 'searching')");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM review_entries r {} ORDER BY r.id ASC LIMIT ? OFFSET ?",
            REVIEW_COLUMNS, where_clause
        );
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), row_to_review)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn search_reviews(&self, text: &str, limit: i64) -> Result<Vec<ReviewEntry>, CatalogError> {
        let conn = self.lock()?;
        let pattern = format!("%{}%", text.trim().to_lowercase());
        let sql = format!(
            "SELECT {} FROM review_entries r
             JOIN source_files s ON s.id = r.source_file_id
             WHERE lower(r.merged) LIKE ?1 OR lower(COALESCE(r.note, '')) LIKE ?1
                OR lower(s.path) LIKE ?1
             ORDER BY r.id ASC LIMIT ?2",
            REVIEW_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, limit], row_to_review)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn update_review(&self, entry: &ReviewEntry) -> Result<ReviewEntry, CatalogError> {
        let conn = self.lock()?;
        let now = Utc::now();
        let changed = conn.execute(
            "UPDATE review_entries SET state = ?, merged = ?, hints = ?, classification = ?,
                note = ?, item_id = ?, updated_at = ? WHERE id = ?",
            params![
                entry.state.as_str(),
                to_json(&entry.merged)?,
                to_json(&entry.hints)?,
                to_json(&entry.classification)?,
                &entry.note,
                entry.item_id,
                now.to_rfc3339(),
                entry.id,
            ],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(format!("review {}", entry.id)));
        }

        let mut updated = entry.clone();
        updated.updated_at = now;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use crate::classifier::{ClassificationResult, ShelfFamily};
    use crate::enricher::MergedMetadata;
    use crate::inspector::{BookFormat, Checksums, ExtractedMetadata, SourceFile};
    use std::path::PathBuf;

    fn store_with_source(path: &str) -> (SqliteCatalogStore, i64) {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let file = store
            .record_source_file(&SourceFile::new(
                PathBuf::from(path),
                Checksums {
                    sha256: "abc".to_string(),
                    md5: "def".to_string(),
                },
                Some(BookFormat::Epub),
                10,
                ExtractedMetadata::default(),
            ))
            .unwrap();
        (store, file.id.unwrap())
    }

    fn new_review(source_file_id: i64, title: &str) -> NewReview {
        NewReview {
            source_file_id,
            reason: ReviewReason::LowConfidence,
            merged: MergedMetadata {
                title: Some(title.to_string()),
                authors: vec!["Ursula K. Le Guin".to_string()],
                ..Default::default()
            },
            hints: Vec::new(),
            classification: ClassificationResult::unclassified(ShelfFamily::Fiction),
            note: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let (store, source_id) = store_with_source("/in/earthsea.epub");
        let entry = store
            .insert_review(new_review(source_id, "A Wizard of Earthsea"))
            .unwrap();
        assert_eq!(entry.state, ReviewState::Pending);
        assert_eq!(entry.merged.title.as_deref(), Some("A Wizard of Earthsea"));

        let fetched = store.get_review(entry.id).unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert!(store.get_review(999).unwrap().is_none());
    }

    #[test]
    fn test_insert_for_unknown_source_fails() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let result = store.insert_review(new_review(42, "Nope"));
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_open_review_and_source_filter() {
        let (store, source_id) = store_with_source("/in/earthsea.epub");
        let mut entry = store
            .insert_review(new_review(source_id, "A Wizard of Earthsea"))
            .unwrap();
        assert!(store.open_review_for_source(source_id).unwrap().is_some());
        assert!(store
            .list_source_files(&crate::catalog::SourceFileFilter::workable())
            .unwrap()
            .is_empty());

        entry.state = ReviewState::Skipped;
        store.update_review(&entry).unwrap();
        assert!(store.open_review_for_source(source_id).unwrap().is_none());
        assert_eq!(
            store
                .list_reviews(&ReviewFilter::new().with_state(ReviewState::Skipped))
                .unwrap()
                .len(),
            1
        );
        assert!(store.list_reviews(&ReviewFilter::open()).unwrap().is_empty());
    }

    #[test]
    fn test_search() {
        let (store, source_id) = store_with_source("/in/Tombs.epub");
        store
            .insert_review(new_review(source_id, "The Tombs of Atuan"))
            .unwrap();

        assert_eq!(store.search_reviews("atuan", 10).unwrap().len(), 1);
        assert_eq!(store.search_reviews("le guin", 10).unwrap().len(), 1);
        assert_eq!(store.search_reviews("tombs.epub", 10).unwrap().len(), 1);
        assert!(store.search_reviews("dune", 10).unwrap().is_empty());
    }
}
