//! Types exchanged between metadata sources, the merge and the classifier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::inspector::{ExtractedMetadata, SeriesInfo};

/// Which provider answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Hints typed in by a reviewer.
    Manual,
    /// OCLC Classify, the cataloging authority.
    Oclc,
    OpenLibrary,
    GoogleBooks,
    #[serde(rename = "librarything")]
    LibraryThing,
    /// The file's own metadata.
    Embedded,
    /// An existing Calibre library; only fills gaps.
    Calibre,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Manual => "manual",
            SourceTag::Oclc => "oclc",
            SourceTag::OpenLibrary => "open_library",
            SourceTag::GoogleBooks => "google_books",
            SourceTag::LibraryThing => "librarything",
            SourceTag::Embedded => "embedded",
            SourceTag::Calibre => "calibre",
        }
    }

    /// Whether classification hints from this source are used verbatim.
    pub fn is_classification_authority(&self) -> bool {
        matches!(self, SourceTag::Manual | SourceTag::Oclc)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sources in descending order of trust. Trust belongs to the source, not
/// to any individual answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRank(Vec<SourceTag>);

impl TrustRank {
    pub fn new(order: Vec<SourceTag>) -> Self {
        Self(order)
    }

    /// Position of `tag`; unknown tags rank after every listed one.
    pub fn rank(&self, tag: SourceTag) -> usize {
        self.0
            .iter()
            .position(|t| *t == tag)
            .unwrap_or(self.0.len())
    }

    pub fn order(&self) -> &[SourceTag] {
        &self.0
    }
}

impl Default for TrustRank {
    fn default() -> Self {
        Self(vec![
            SourceTag::Manual,
            SourceTag::Oclc,
            SourceTag::OpenLibrary,
            SourceTag::GoogleBooks,
            SourceTag::LibraryThing,
            SourceTag::Embedded,
            SourceTag::Calibre,
        ])
    }
}

/// What to look a book up by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LookupQuery {
    Identifier { isbn: String },
    TitleAuthor {
        title: String,
        author: Option<String>,
    },
}

impl LookupQuery {
    pub fn isbn(isbn: impl Into<String>) -> Self {
        LookupQuery::Identifier { isbn: isbn.into() }
    }

    pub fn title_author(title: impl Into<String>, author: Option<String>) -> Self {
        LookupQuery::TitleAuthor {
            title: title.into(),
            author,
        }
    }
}

impl fmt::Display for LookupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupQuery::Identifier { isbn } => write!(f, "isbn:{}", isbn),
            LookupQuery::TitleAuthor { title, author } => match author {
                Some(author) => write!(f, "\"{}\" by {}", title, author),
                None => write!(f, "\"{}\"", title),
            },
        }
    }
}

/// One source's answer to a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentCandidate {
    pub source: SourceTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Scheme ("isbn_13", "oclc", "olid", ...) to value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_ref: Option<String>,
    /// Explicit fiction flag, when the source states one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiction: Option<bool>,
}

impl EnrichmentCandidate {
    pub fn new(source: SourceTag) -> Self {
        Self {
            source,
            title: None,
            authors: Vec::new(),
            publisher: None,
            publish_date: None,
            description: None,
            language: None,
            identifiers: BTreeMap::new(),
            classification_hint: None,
            subjects: Vec::new(),
            series: None,
            cover_ref: None,
            fiction: None,
        }
    }

    /// The file's own metadata as the lowest-trust candidate.
    pub fn from_extracted(meta: &ExtractedMetadata) -> Self {
        let mut identifiers = BTreeMap::new();
        for raw in &meta.identifiers {
            if let Some(isbn) = crate::identifier::isbn::normalize(raw) {
                let scheme = if isbn.len() == 13 { "isbn_13" } else { "isbn_10" };
                identifiers.entry(scheme.to_string()).or_insert(isbn);
            }
        }
        Self {
            source: SourceTag::Embedded,
            title: meta.title.clone(),
            authors: meta.authors.clone(),
            publisher: meta.publisher.clone(),
            publish_date: meta.publish_date.clone(),
            description: meta.description.clone(),
            language: meta.language.clone(),
            identifiers,
            classification_hint: None,
            subjects: meta.subjects.clone(),
            series: meta.series.clone(),
            cover_ref: None,
            fiction: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_authors(mut self, authors: Vec<&str>) -> Self {
        self.authors = authors.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_classification(mut self, code: impl Into<String>) -> Self {
        self.classification_hint = Some(code.into());
        self
    }

    pub fn with_subjects(mut self, subjects: Vec<&str>) -> Self {
        self.subjects = subjects.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_series(mut self, name: impl Into<String>, index: Option<f32>) -> Self {
        self.series = Some(SeriesInfo::new(name, index));
        self
    }

    pub fn with_identifier(mut self, scheme: &str, value: impl Into<String>) -> Self {
        self.identifiers.insert(scheme.to_string(), value.into());
        self
    }
}

/// A classification code offered by one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationHint {
    pub source: SourceTag,
    pub code: String,
}

/// Merged view of all candidates. `provenance` records which source
/// supplied each filled field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiction: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provenance: BTreeMap<String, SourceTag>,
}

impl MergedMetadata {
    pub fn isbn13(&self) -> Option<&str> {
        self.identifiers.get("isbn_13").map(String::as_str)
    }

    pub fn isbn10(&self) -> Option<&str> {
        self.identifiers.get("isbn_10").map(String::as_str)
    }

    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// Everything the enricher learned about one book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    pub candidates: Vec<EnrichmentCandidate>,
    pub merged: MergedMetadata,
    /// Per-source classification hints, unaggregated, in trust order.
    pub hints: Vec<ClassificationHint>,
    /// Sources that errored or were cut off by the time budget.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_sources: Vec<SourceTag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_rank_order() {
        let rank = TrustRank::default();
        assert!(rank.rank(SourceTag::Oclc) < rank.rank(SourceTag::OpenLibrary));
        assert!(rank.rank(SourceTag::OpenLibrary) < rank.rank(SourceTag::GoogleBooks));
        assert!(rank.rank(SourceTag::GoogleBooks) < rank.rank(SourceTag::LibraryThing));
        assert!(rank.rank(SourceTag::LibraryThing) < rank.rank(SourceTag::Embedded));
        assert!(rank.rank(SourceTag::Embedded) < rank.rank(SourceTag::Calibre));
        assert!(rank.rank(SourceTag::Manual) < rank.rank(SourceTag::Oclc));
    }

    #[test]
    fn test_unknown_source_ranks_last() {
        let rank = TrustRank::new(vec![SourceTag::OpenLibrary]);
        assert_eq!(rank.rank(SourceTag::Oclc), 1);
    }

    #[test]
    fn test_lookup_query_serde() {
        let query = LookupQuery::isbn("9780134685991");
        let json = serde_json::to_string(&query).unwrap();
        assert_eq!(json, r#"{"type":"identifier","isbn":"9780134685991"}"#);
    }

    #[test]
    fn test_candidate_from_extracted() {
        let meta = ExtractedMetadata {
            title: Some("Dune".to_string()),
            identifiers: vec!["urn:isbn:9780441013593".to_string(), "junk".to_string()],
            ..Default::default()
        };
        let candidate = EnrichmentCandidate::from_extracted(&meta);
        assert_eq!(candidate.source, SourceTag::Embedded);
        assert_eq!(
            candidate.identifiers.get("isbn_13").map(String::as_str),
            Some("9780441013593")
        );
        assert_eq!(candidate.identifiers.len(), 1);
    }
}
