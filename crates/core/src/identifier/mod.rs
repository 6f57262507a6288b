//! Identifier: picks at most one validated ISBN for a book.
//!
//! Embedded identifiers are considered first; the content sample is only
//! scanned when nothing embedded validates. ISBN-13s are preferred over
//! ISBN-10s, and an ISBN-10 naming the same book as a present ISBN-13 is
//! folded into it. Two or more distinct survivors mean the file is
//! ambiguous, and no identifier is returned.

pub mod isbn;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::inspector::ExtractedMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Isbn13,
    Isbn10,
}

/// Where the identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierOrigin {
    /// Read from the file's descriptive metadata.
    Embedded,
    /// Found in the book's early text.
    Scanned,
    /// Supplied by a reviewer.
    Manual,
}

impl IdentifierOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierOrigin::Embedded => "embedded",
            IdentifierOrigin::Scanned => "scanned",
            IdentifierOrigin::Manual => "manual",
        }
    }
}

/// A check-digit validated ISBN, digits only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub value: String,
    pub kind: IdentifierKind,
    pub origin: IdentifierOrigin,
}

impl Identifier {
    /// Validates and normalizes `raw`.
    pub fn parse(raw: &str, origin: IdentifierOrigin) -> Option<Self> {
        let value = isbn::normalize(raw)?;
        let kind = if value.len() == 13 {
            IdentifierKind::Isbn13
        } else {
            IdentifierKind::Isbn10
        };
        Some(Self {
            value,
            kind,
            origin,
        })
    }

    /// The thirteen-digit form, converting ISBN-10s.
    pub fn isbn13(&self) -> Option<String> {
        match self.kind {
            IdentifierKind::Isbn13 => Some(self.value.clone()),
            IdentifierKind::Isbn10 => isbn::isbn10_to_13(&self.value),
        }
    }

    /// The ten-digit form, when one exists.
    pub fn isbn10(&self) -> Option<String> {
        match self.kind {
            IdentifierKind::Isbn10 => Some(self.value.clone()),
            IdentifierKind::Isbn13 => isbn::isbn13_to_10(&self.value),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.origin.as_str())
    }
}

/// How a set of candidates resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unique(Identifier),
    Ambiguous(Vec<String>),
    NotFound,
}

/// Returns the single identifier for a book, or `None` if there is none or
/// the candidates disagree.
pub fn identify(metadata: &ExtractedMetadata, content_sample: Option<&str>) -> Option<Identifier> {
    match resolve(metadata, content_sample) {
        Resolution::Unique(identifier) => Some(identifier),
        Resolution::Ambiguous(candidates) => {
            debug!(?candidates, "Ambiguous identifiers, treating as none");
            None
        }
        Resolution::NotFound => None,
    }
}

/// Like [`identify`] but reports why nothing was chosen.
pub fn resolve(metadata: &ExtractedMetadata, content_sample: Option<&str>) -> Resolution {
    let embedded: Vec<String> = metadata
        .identifiers
        .iter()
        .filter_map(|raw| isbn::normalize(raw))
        .collect();
    if !embedded.is_empty() {
        return pick(embedded, IdentifierOrigin::Embedded);
    }

    match content_sample {
        Some(text) => {
            let scanned = isbn::find_in_text(text);
            if scanned.is_empty() {
                Resolution::NotFound
            } else {
                pick(scanned, IdentifierOrigin::Scanned)
            }
        }
        None => Resolution::NotFound,
    }
}

fn pick(candidates: Vec<String>, origin: IdentifierOrigin) -> Resolution {
    let (thirteens, tens): (Vec<String>, Vec<String>) =
        candidates.into_iter().partition(|c| c.len() == 13);

    let mut distinct: Vec<String> = Vec::new();
    if !thirteens.is_empty() {
        for c in thirteens {
            if !distinct.contains(&c) {
                distinct.push(c);
            }
        }
    } else {
        let mut seen13: Vec<String> = Vec::new();
        for c in tens {
            let key = isbn::isbn10_to_13(&c).unwrap_or_else(|| c.clone());
            if !seen13.contains(&key) {
                seen13.push(key);
                distinct.push(c);
            }
        }
    }

    match distinct.len() {
        0 => Resolution::NotFound,
        1 => match Identifier::parse(&distinct[0], origin) {
            Some(identifier) => Resolution::Unique(identifier),
            None => Resolution::NotFound,
        },
        _ => Resolution::Ambiguous(distinct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ids: &[&str]) -> ExtractedMetadata {
        ExtractedMetadata {
            identifiers: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_embedded_isbn13() {
        let id = identify(&meta(&["urn:isbn:9780134685991"]), None).unwrap();
        assert_eq!(id.value, "9780134685991");
        assert_eq!(id.kind, IdentifierKind::Isbn13);
        assert_eq!(id.origin, IdentifierOrigin::Embedded);
        assert_eq!(id.to_string(), "9780134685991 (embedded)");
    }

    #[test]
    fn test_prefers_isbn13_over_isbn10() {
        // A different book's ISBN-10 next to the ISBN-13.
        let id = identify(&meta(&["080442957X", "9780134685991"]), None).unwrap();
        assert_eq!(id.value, "9780134685991");
    }

    #[test]
    fn test_same_book_in_both_forms() {
        let id = identify(&meta(&["0134685997", "978-0-13-468599-1"]), None).unwrap();
        assert_eq!(id.value, "9780134685991");
    }

    #[test]
    fn test_two_distinct_isbn13_is_ambiguous() {
        let m = meta(&["9780134685991", "9780132350884"]);
        assert!(identify(&m, None).is_none());
        assert!(matches!(resolve(&m, None), Resolution::Ambiguous(v) if v.len() == 2));
    }

    #[test]
    fn test_two_distinct_isbn10_is_ambiguous() {
        assert!(identify(&meta(&["0134685997", "080442957X"]), None).is_none());
    }

    #[test]
    fn test_invalid_embedded_falls_back_to_scan() {
        let m = meta(&["9780134685990", "uuid:1234"]);
        let id = identify(&m, Some("Printed in USA. ISBN 978-0-13-235088-4")).unwrap();
        assert_eq!(id.value, "9780132350884");
        assert_eq!(id.origin, IdentifierOrigin::Scanned);
    }

    #[test]
    fn test_scan_not_used_when_embedded_valid() {
        let id = identify(
            &meta(&["9780134685991"]),
            Some("ISBN 978-0-13-235088-4"),
        )
        .unwrap();
        assert_eq!(id.value, "9780134685991");
        assert_eq!(id.origin, IdentifierOrigin::Embedded);
    }

    #[test]
    fn test_nothing_found() {
        assert_eq!(
            resolve(&ExtractedMetadata::default(), Some("no numbers here")),
            Resolution::NotFound
        );
        assert!(identify(&ExtractedMetadata::default(), None).is_none());
    }

    #[test]
    fn test_conversions_on_identifier() {
        let id = Identifier::parse("0134685997", IdentifierOrigin::Manual).unwrap();
        assert_eq!(id.isbn13().as_deref(), Some("9780134685991"));
        assert_eq!(id.isbn10().as_deref(), Some("0134685997"));
    }
}
