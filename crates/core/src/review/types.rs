//! Review queue types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::ClassificationResult;
use crate::enricher::{ClassificationHint, MergedMetadata};

/// Where a review entry stands.
///
/// ```text
/// pending ──> searching ──> pending
///    │            │
///    └────────────┴──> filed | skipped | duplicate
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// Awaiting a decision.
    Pending,
    /// A reviewer is re-querying with corrected hints.
    Searching,
    Filed,
    Skipped,
    Duplicate,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Pending => "pending",
            ReviewState::Searching => "searching",
            ReviewState::Filed => "filed",
            ReviewState::Skipped => "skipped",
            ReviewState::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewState::Pending),
            "searching" => Some(ReviewState::Searching),
            "filed" => Some(ReviewState::Filed),
            "skipped" => Some(ReviewState::Skipped),
            "duplicate" => Some(ReviewState::Duplicate),
            _ => None,
        }
    }

    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReviewState::Filed | ReviewState::Skipped | ReviewState::Duplicate
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ReviewState) -> bool {
        match (self, next) {
            (ReviewState::Pending, ReviewState::Pending) => false,
            (ReviewState::Pending, _) => true,
            (ReviewState::Searching, ReviewState::Searching) => false,
            (ReviewState::Searching, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item landed in review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Classification confidence fell below the threshold.
    LowConfidence,
    /// The canonical target exists with different content.
    FilingConflict,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::LowConfidence => "low_confidence",
            ReviewReason::FilingConflict => "filing_conflict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low_confidence" => Some(ReviewReason::LowConfidence),
            "filing_conflict" => Some(ReviewReason::FilingConflict),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A held item and everything the pipeline knew when it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub id: i64,
    pub source_file_id: i64,
    pub state: ReviewState,
    pub reason: ReviewReason,
    pub merged: MergedMetadata,
    pub hints: Vec<ClassificationHint>,
    pub classification: ClassificationResult,
    /// Free text shown to the reviewer: the conflicting path, the last
    /// failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Item the entry was filed under or matched as a duplicate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a new entry.
#[derive(Debug, Clone)]
pub struct NewReview {
    pub source_file_id: i64,
    pub reason: ReviewReason,
    pub merged: MergedMetadata,
    pub hints: Vec<ClassificationHint>,
    pub classification: ClassificationResult,
    pub note: Option<String>,
}

/// Corrected lookup data supplied by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Hint {
    Isbn { isbn: String },
    TitleAuthor { title: String, author: Option<String> },
}

impl Hint {
    pub fn isbn(isbn: impl Into<String>) -> Self {
        Hint::Isbn { isbn: isbn.into() }
    }

    pub fn title_author(title: impl Into<String>, author: Option<String>) -> Self {
        Hint::TitleAuthor {
            title: title.into(),
            author,
        }
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hint::Isbn { isbn } => write!(f, "isbn {}", isbn),
            Hint::TitleAuthor {
                title,
                author: Some(author),
            } => write!(f, "\"{}\" by {}", title, author),
            Hint::TitleAuthor {
                title,
                author: None,
            } => write!(f, "\"{}\"", title),
        }
    }
}

/// A reviewer's decision to close an entry without filing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalDecision {
    Skipped,
    /// The file is another copy of an existing catalog item.
    Duplicate { item_id: i64 },
}

impl TerminalDecision {
    pub fn state(&self) -> ReviewState {
        match self {
            TerminalDecision::Skipped => ReviewState::Skipped,
            TerminalDecision::Duplicate { .. } => ReviewState::Duplicate,
        }
    }
}

/// Filter for listing entries.
#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub state: Option<ReviewState>,
    /// Only `pending` and `searching` entries.
    pub open_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl ReviewFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            open_only: false,
            limit: 100,
            offset: 0,
        }
    }

    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Self::new()
        }
    }

    pub fn with_state(mut self, state: ReviewState) -> Self {
        self.state = Some(state);
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
