//! Types produced by the inspector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::identifier::Identifier;

/// Container formats the inspector can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookFormat {
    Epub,
    Pdf,
    Mobi,
    Azw3,
    Djvu,
    Cbz,
    Cbr,
}

impl BookFormat {
    /// File extension used when filing, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
            BookFormat::Mobi => "mobi",
            BookFormat::Azw3 => "azw3",
            BookFormat::Djvu => "djvu",
            BookFormat::Cbz => "cbz",
            BookFormat::Cbr => "cbr",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "pdf" => Some(BookFormat::Pdf),
            "mobi" | "prc" => Some(BookFormat::Mobi),
            "azw3" | "azw" | "kf8" => Some(BookFormat::Azw3),
            "djvu" | "djv" => Some(BookFormat::Djvu),
            "cbz" => Some(BookFormat::Cbz),
            "cbr" => Some(BookFormat::Cbr),
            _ => None,
        }
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strong and fast content digests, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksums {
    pub sha256: String,
    pub md5: String,
}

/// Series membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub name: String,
    /// Position within the series. Fractional positions ("2.5") happen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<f32>,
}

impl SeriesInfo {
    pub fn new(name: impl Into<String>, index: Option<f32>) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

/// Best-effort descriptive fields read from the file itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Raw identifier strings as found ("urn:isbn:978-...", "0-13-...").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesInfo>,
}

impl ExtractedMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.authors.is_empty()
            && self.identifiers.is_empty()
            && self.subjects.is_empty()
    }

    /// Fills every empty field from `other`, keeping existing values.
    pub fn fill_from(&mut self, other: ExtractedMetadata) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.title, other.title);
        fill(&mut self.publisher, other.publisher);
        fill(&mut self.publish_date, other.publish_date);
        fill(&mut self.description, other.description);
        fill(&mut self.language, other.language);
        fill(&mut self.series, other.series);
        if self.authors.is_empty() {
            self.authors = other.authors;
        }
        if self.subjects.is_empty() {
            self.subjects = other.subjects;
        }
        for id in other.identifiers {
            if !self.identifiers.contains(&id) {
                self.identifiers.push(id);
            }
        }
    }
}

/// Lifecycle of an intake file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    /// Claimed by a running batch.
    Processing,
    Migrated,
    Duplicate,
    Skipped,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Migrated => "migrated",
            SourceStatus::Duplicate => "duplicate",
            SourceStatus::Skipped => "skipped",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SourceStatus::Pending),
            "processing" => Some(SourceStatus::Processing),
            "migrated" => Some(SourceStatus::Migrated),
            "duplicate" => Some(SourceStatus::Duplicate),
            "skipped" => Some(SourceStatus::Skipped),
            "failed" => Some(SourceStatus::Failed),
            _ => None,
        }
    }

    /// Whether the file has left the intake workflow for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceStatus::Migrated | SourceStatus::Duplicate | SourceStatus::Skipped
        )
    }

    pub fn all() -> [SourceStatus; 6] {
        [
            SourceStatus::Pending,
            SourceStatus::Processing,
            SourceStatus::Migrated,
            SourceStatus::Duplicate,
            SourceStatus::Skipped,
            SourceStatus::Failed,
        ]
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of intake work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Row id once recorded in the catalog.
    pub id: Option<i64>,
    /// Path at intake time.
    pub path: PathBuf,
    pub checksums: Checksums,
    pub format: Option<BookFormat>,
    pub size_bytes: u64,
    pub extracted: ExtractedMetadata,
    pub identifier: Option<Identifier>,
    pub status: SourceStatus,
    /// Why the file failed, for `failed` rows.
    pub error: Option<String>,
    /// Catalog item this file was filed under or duplicates.
    pub item_id: Option<i64>,
    /// Library path the file is being moved to. Written before the move so
    /// an interrupted filing can be reconciled from the checksum.
    pub placed_path: Option<PathBuf>,
    /// Intake copy with the same bytes that is processed in this one's
    /// place. Set for `duplicate` rows grouped at scan time.
    pub duplicate_of: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(
        path: PathBuf,
        checksums: Checksums,
        format: Option<BookFormat>,
        size_bytes: u64,
        extracted: ExtractedMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            path,
            checksums,
            format,
            size_bytes,
            extracted,
            identifier: None,
            status: SourceStatus::Pending,
            error: None,
            item_id: None,
            placed_path: None,
            duplicate_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A record for a file that could not be inspected.
    pub fn failed(path: PathBuf, checksums: Option<Checksums>, reason: String) -> Self {
        let checksums = checksums.unwrap_or(Checksums {
            sha256: String::new(),
            md5: String::new(),
        });
        let mut file = Self::new(path, checksums, None, 0, ExtractedMetadata::default());
        file.status = SourceStatus::Failed;
        file.error = Some(reason);
        file
    }

    /// File name without directories.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
