//! Types for the library catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::classifier::ClassificationMethod;
use crate::inspector::{BookFormat, SeriesInfo, SourceStatus};

/// A book in the library. One item can hold several physical files, for
/// instance an EPUB and a PDF of the same edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub title: String,
    /// Title without a leading article, for ordering.
    pub sort_title: String,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesInfo>,
    /// Final classification code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    pub classification_method: ClassificationMethod,
    pub confidence: f32,
    pub fiction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub identifiers: BTreeMap<String, String>,
    pub subjects: Vec<String>,
    /// Remote cover reference; recorded, never downloaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_ref: Option<String>,
    pub files: Vec<FileRef>,
    /// Source files filed under this item or recognized as duplicates of it.
    pub source_file_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn isbn13(&self) -> Option<&str> {
        self.identifiers.get("isbn_13").map(String::as_str)
    }

    /// Whether one of this item's files has `sha256`.
    pub fn has_checksum(&self, sha256: &str) -> bool {
        self.files.iter().any(|f| f.sha256 == sha256)
    }
}

/// A physical file kept in the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Path relative to the library root, `/`-separated.
    pub path: String,
    pub format: BookFormat,
    pub size_bytes: u64,
    pub sha256: String,
    pub md5: String,
}

/// Filter for listing source files.
#[derive(Debug, Clone, Default)]
pub struct SourceFileFilter {
    pub status: Option<SourceStatus>,
    /// `Some(false)` leaves out files with an open review entry,
    /// `Some(true)` keeps only those.
    pub in_review: Option<bool>,
    pub sha256: Option<String>,
    pub format: Option<BookFormat>,
    /// Copies grouped under this intake row.
    pub duplicate_of: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl SourceFileFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            in_review: None,
            sha256: None,
            format: None,
            duplicate_of: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Pending files that are not waiting on a reviewer.
    pub fn workable() -> Self {
        Self::new()
            .with_status(SourceStatus::Pending)
            .with_in_review(false)
    }

    pub fn with_status(mut self, status: SourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_in_review(mut self, in_review: bool) -> Self {
        self.in_review = Some(in_review);
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_format(mut self, format: BookFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_duplicate_of(mut self, primary_id: i64) -> Self {
        self.duplicate_of = Some(primary_id);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Aggregate counts for the status report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub items: u64,
    pub files: u64,
    pub total_size_bytes: u64,
    /// Source files per status, every status listed.
    pub by_status: Vec<(SourceStatus, u64)>,
    /// Source files per detected format; `"unknown"` for undetected.
    pub by_format: Vec<(String, u64)>,
    pub open_reviews: u64,
}

/// Errors for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A write would break a uniqueness rule (checksum or library path).
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, ref msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CatalogError::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            other => CatalogError::Database(other.to_string()),
        }
    }
}

const ARTICLES: &[&str] = &["the ", "a ", "an "];

/// Title for ordering: leading English article dropped.
pub fn sort_title(title: &str) -> String {
    let trimmed = title.trim();
    let lower = trimmed.to_lowercase();
    for article in ARTICLES {
        if lower.starts_with(article) && trimmed.len() > article.len() {
            return trimmed[article.len()..].trim_start().to_string();
        }
    }
    trimmed.to_string()
}
