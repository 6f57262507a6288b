//! Classification results and confidence tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ClassificationConfig;
use crate::enricher::SourceTag;

/// How a classification code was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Hint from a cataloging authority, used verbatim.
    Authoritative,
    /// Hint from a source that is not a cataloging authority.
    Hinted,
    /// Derived from subject headings through the subject table.
    SubjectMapped,
    Unclassified,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::Authoritative => "authoritative",
            ClassificationMethod::Hinted => "hinted",
            ClassificationMethod::SubjectMapped => "subject_mapped",
            ClassificationMethod::Unclassified => "unclassified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authoritative" => Some(ClassificationMethod::Authoritative),
            "hinted" => Some(ClassificationMethod::Hinted),
            "subject_mapped" => Some(ClassificationMethod::SubjectMapped),
            "unclassified" => Some(ClassificationMethod::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which directory family a book is shelved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShelfFamily {
    /// Flat: `Fiction/<name>/`.
    Fiction,
    /// Hierarchical by code range: `Non-Fiction/<range>/<name>/`.
    NonFiction,
}

impl ShelfFamily {
    pub fn is_fiction(&self) -> bool {
        matches!(self, ShelfFamily::Fiction)
    }
}

/// Outcome of classifying one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Normalized DDC-style code, absent when unclassified.
    pub code: Option<String>,
    pub confidence: f32,
    pub method: ClassificationMethod,
    pub family: ShelfFamily,
    /// Source whose hint was used, for hint-based methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceTag>,
    /// Subject heading that matched, for subject-mapped results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_subject: Option<String>,
}

impl ClassificationResult {
    pub fn unclassified(family: ShelfFamily) -> Self {
        Self {
            code: None,
            confidence: 0.0,
            method: ClassificationMethod::Unclassified,
            family,
            source: None,
            matched_subject: None,
        }
    }

    /// Whether this result clears `threshold`. Equal counts as passing.
    pub fn meets(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// The same result with confidence forced to the maximum, for a
    /// reviewer's explicit override.
    pub fn forced(mut self) -> Self {
        self.confidence = 1.0;
        self
    }

    /// One-line explanation for review listings.
    pub fn describe(&self) -> String {
        let code = self.code.as_deref().unwrap_or("-");
        match (&self.source, &self.matched_subject) {
            (Some(source), _) => format!(
                "{} {} ({:.2}, from {})",
                self.method, code, self.confidence, source
            ),
            (None, Some(subject)) => format!(
                "{} {} ({:.2}, subject \"{}\")",
                self.method, code, self.confidence, subject
            ),
            (None, None) => format!("{} {} ({:.2})", self.method, code, self.confidence),
        }
    }
}

/// Fixed confidence per method. Only the ordering
/// authoritative > hinted > subject-mapped > unclassified is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceTiers {
    pub authoritative: f32,
    pub hinted: f32,
    pub subject_mapped: f32,
}

impl ConfidenceTiers {
    pub fn for_method(&self, method: ClassificationMethod) -> f32 {
        match method {
            ClassificationMethod::Authoritative => self.authoritative,
            ClassificationMethod::Hinted => self.hinted,
            ClassificationMethod::SubjectMapped => self.subject_mapped,
            ClassificationMethod::Unclassified => 0.0,
        }
    }
}

impl Default for ConfidenceTiers {
    fn default() -> Self {
        Self::from(&ClassificationConfig::default())
    }
}

impl From<&ClassificationConfig> for ConfidenceTiers {
    fn from(config: &ClassificationConfig) -> Self {
        Self {
            authoritative: 1.0,
            hinted: config.hinted_confidence,
            subject_mapped: config.subject_mapped_confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        let tiers = ConfidenceTiers::default();
        assert_eq!(tiers.authoritative, 1.0);
        assert!(tiers.authoritative > tiers.hinted);
        assert!(tiers.hinted > tiers.subject_mapped);
        assert!(tiers.subject_mapped > tiers.for_method(ClassificationMethod::Unclassified));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut result = ClassificationResult::unclassified(ShelfFamily::NonFiction);
        result.confidence = 0.8;
        assert!(result.meets(0.8));
        result.confidence = 0.8 - f32::EPSILON;
        assert!(!result.meets(0.8));
    }

    #[test]
    fn test_describe() {
        let result = ClassificationResult {
            code: Some("813".to_string()),
            confidence: 0.6,
            method: ClassificationMethod::SubjectMapped,
            family: ShelfFamily::Fiction,
            source: None,
            matched_subject: Some("fantasy fiction".to_string()),
        };
        assert_eq!(
            result.describe(),
            "subject_mapped 813 (0.60, subject \"fantasy fiction\")"
        );
    }
}
