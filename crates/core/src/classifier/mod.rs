//! Classifier: turns merged metadata and per-source hints into a
//! classification code with a fixed-tier confidence.
//!
//! Decision list, first match wins:
//! 1. a hint from a cataloging authority, verbatim;
//! 2. any other hint, first in trust order;
//! 3. the subject table;
//! 4. unclassified.
//!
//! Independently of the code, the fiction/non-fiction family is decided
//! from the explicit fiction flag, then the code, then subject keywords.

mod subjects;
mod types;

pub use subjects::{normalize_subject, SubjectEntry, SubjectMatch, SubjectTable};
pub use types::*;

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ClassificationConfig;
use crate::enricher::{ddc_class, normalize_ddc, ClassificationHint, MergedMetadata};

/// Errors loading classifier inputs.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Failed to read subject table {path}: {reason}")]
    TableRead { path: PathBuf, reason: String },

    #[error("Invalid subject table: {0}")]
    TableParse(String),
}

/// Integer classes of literature that are fiction.
const FICTION_CLASSES: &[u16] = &[813, 823, 833, 843, 853, 863, 873, 883];

/// Subject words that mark fiction.
const FICTION_KEYWORDS: &[&str] = &[
    "fiction",
    "novel",
    "novels",
    "stories",
    "fantasy",
    "thriller",
    "thrillers",
    "romance",
    "horror",
    "mystery",
];

/// Stateless apart from its injected table and tiers.
#[derive(Debug, Clone)]
pub struct Classifier {
    table: SubjectTable,
    tiers: ConfidenceTiers,
}

impl Classifier {
    pub fn new(table: SubjectTable, tiers: ConfidenceTiers) -> Self {
        Self { table, tiers }
    }

    /// Uses the configured subject table, or the built-in one.
    pub fn from_config(config: &ClassificationConfig) -> Result<Self, ClassifierError> {
        let table = match &config.subject_table {
            Some(path) => SubjectTable::load(path)?,
            None => SubjectTable::builtin(),
        };
        Ok(Self::new(table, ConfidenceTiers::from(config)))
    }

    pub fn table(&self) -> &SubjectTable {
        &self.table
    }

    pub fn tiers(&self) -> &ConfidenceTiers {
        &self.tiers
    }

    /// Classifies one book. `hints` are expected in trust order.
    pub fn classify(
        &self,
        metadata: &MergedMetadata,
        hints: &[ClassificationHint],
    ) -> ClassificationResult {
        let mut result = self.choose_code(metadata, hints);
        result.family = shelf_family(metadata, result.code.as_deref());
        result
    }

    fn choose_code(
        &self,
        metadata: &MergedMetadata,
        hints: &[ClassificationHint],
    ) -> ClassificationResult {
        let usable = |hint: &ClassificationHint| {
            normalize_ddc(&hint.code).map(|code| (hint.source, code))
        };

        let authoritative = hints
            .iter()
            .filter(|h| h.source.is_classification_authority())
            .find_map(usable);
        let hinted = || {
            hints
                .iter()
                .filter(|h| !h.source.is_classification_authority())
                .find_map(usable)
        };

        let (method, code, source) = if let Some((source, code)) = authoritative {
            (ClassificationMethod::Authoritative, code, Some(source))
        } else if let Some((source, code)) = hinted() {
            (ClassificationMethod::Hinted, code, Some(source))
        } else if let Some(found) = self.table.lookup(&metadata.subjects) {
            return ClassificationResult {
                code: Some(found.code),
                confidence: self.tiers.for_method(ClassificationMethod::SubjectMapped),
                method: ClassificationMethod::SubjectMapped,
                family: ShelfFamily::NonFiction,
                source: None,
                matched_subject: Some(found.subject),
            };
        } else {
            return ClassificationResult::unclassified(ShelfFamily::NonFiction);
        };

        ClassificationResult {
            code: Some(code),
            confidence: self.tiers.for_method(method),
            method,
            family: ShelfFamily::NonFiction,
            source,
            matched_subject: None,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(SubjectTable::builtin(), ConfidenceTiers::default())
    }
}

/// Decides the directory family.
pub fn shelf_family(metadata: &MergedMetadata, code: Option<&str>) -> ShelfFamily {
    let fiction = metadata.fiction.unwrap_or_else(|| {
        code.is_some_and(is_fiction_code) || has_fiction_subject(&metadata.subjects)
    });
    if fiction {
        ShelfFamily::Fiction
    } else {
        ShelfFamily::NonFiction
    }
}

/// Whether a normalized code sits in a fiction class.
pub fn is_fiction_code(code: &str) -> bool {
    if code.starts_with("891.7") {
        return true;
    }
    ddc_class(code).is_some_and(|class| FICTION_CLASSES.contains(&class))
}

fn has_fiction_subject(subjects: &[String]) -> bool {
    subjects.iter().any(|subject| {
        let lower = subject.to_lowercase();
        if lower.contains("nonfiction") || lower.contains("non-fiction") {
            return false;
        }
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| FICTION_KEYWORDS.contains(&word))
    })
}
