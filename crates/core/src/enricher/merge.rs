//! Field-by-field merge of enrichment candidates.
//!
//! Every field is taken from the most trusted candidate that has a
//! non-empty value for it. Candidates are never preferred wholesale, so a
//! lower-ranked source can still fill a field the higher ones left empty.

use std::collections::BTreeMap;

use super::types::{ClassificationHint, EnrichmentCandidate, MergedMetadata, SourceTag, TrustRank};
use crate::inspector::SeriesInfo;

/// Values that can be "empty" for merge purposes.
trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for SeriesInfo {
    fn is_present(&self) -> bool {
        self.name.is_present()
    }
}

impl Presence for bool {
    fn is_present(&self) -> bool {
        true
    }
}

/// Walks `ordered` and returns the first present value, recording which
/// source supplied it.
fn first_present<T, F>(
    ordered: &[&EnrichmentCandidate],
    field: &str,
    provenance: &mut BTreeMap<String, SourceTag>,
    get: F,
) -> Option<T>
where
    T: Presence + Clone,
    F: Fn(&EnrichmentCandidate) -> Option<&T>,
{
    for candidate in ordered {
        if let Some(value) = get(candidate).filter(|v| v.is_present()) {
            provenance.insert(field.to_string(), candidate.source);
            return Some(value.clone());
        }
    }
    None
}

/// Candidates sorted by trust; ties keep their arrival order.
pub fn ranked<'a>(
    candidates: &'a [EnrichmentCandidate],
    rank: &TrustRank,
) -> Vec<&'a EnrichmentCandidate> {
    let mut ordered: Vec<&EnrichmentCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| rank.rank(c.source));
    ordered
}

/// Merges candidates under `rank`.
pub fn merge(candidates: &[EnrichmentCandidate], rank: &TrustRank) -> MergedMetadata {
    let ordered = ranked(candidates, rank);
    let mut provenance = BTreeMap::new();

    let title = first_present(&ordered, "title", &mut provenance, |c| c.title.as_ref());
    let authors =
        first_present(&ordered, "authors", &mut provenance, |c| Some(&c.authors)).unwrap_or_default();
    let publisher = first_present(&ordered, "publisher", &mut provenance, |c| c.publisher.as_ref());
    let publish_date =
        first_present(&ordered, "publish_date", &mut provenance, |c| c.publish_date.as_ref());
    let description =
        first_present(&ordered, "description", &mut provenance, |c| c.description.as_ref());
    let language = first_present(&ordered, "language", &mut provenance, |c| c.language.as_ref());
    let subjects =
        first_present(&ordered, "subjects", &mut provenance, |c| Some(&c.subjects)).unwrap_or_default();
    let series = first_present(&ordered, "series", &mut provenance, |c| c.series.as_ref());
    let cover_ref = first_present(&ordered, "cover_ref", &mut provenance, |c| c.cover_ref.as_ref());
    let fiction = first_present(&ordered, "fiction", &mut provenance, |c| c.fiction.as_ref());

    let mut schemes: Vec<&String> = ordered
        .iter()
        .copied()
        .flat_map(|c| c.identifiers.keys())
        .collect();
    schemes.sort();
    schemes.dedup();
    let mut identifiers = BTreeMap::new();
    for scheme in schemes {
        let field = format!("identifiers.{}", scheme);
        if let Some(value) =
            first_present(&ordered, &field, &mut provenance, |c| c.identifiers.get(scheme))
        {
            identifiers.insert(scheme.clone(), value);
        }
    }

    MergedMetadata {
        title,
        authors,
        publisher,
        publish_date,
        description,
        language,
        identifiers,
        subjects,
        series,
        cover_ref,
        fiction,
        provenance,
    }
}

/// Classification hints, one per source that offered one, in trust order.
pub fn collect_hints(candidates: &[EnrichmentCandidate], rank: &TrustRank) -> Vec<ClassificationHint> {
    ranked(candidates, rank)
        .into_iter()
        .filter_map(|c| {
            c.classification_hint
                .as_ref()
                .filter(|code| code.is_present())
                .map(|code| ClassificationHint {
                    source: c.source,
                    code: code.trim().to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_trust_title_wins_even_if_less_complete() {
        let low = EnrichmentCandidate::new(SourceTag::GoogleBooks)
            .with_title("Clean Code: A Handbook of Agile Software Craftsmanship")
            .with_authors(vec!["Robert C. Martin"])
            .with_description("Even bad code can function.")
            .with_subjects(vec!["Computers"]);
        let medium = EnrichmentCandidate::new(SourceTag::OpenLibrary)
            .with_title("Clean code")
            .with_authors(vec!["Robert C. Martin"]);
        let high = EnrichmentCandidate::new(SourceTag::Oclc).with_title("Clean Code");

        // Arrival order must not matter.
        let merged = merge(&[low, medium, high], &TrustRank::default());
        assert_eq!(merged.title.as_deref(), Some("Clean Code"));
        assert_eq!(merged.provenance.get("title"), Some(&SourceTag::Oclc));
    }

    #[test]
    fn test_lower_trust_fills_missing_fields() {
        let high = EnrichmentCandidate::new(SourceTag::Oclc)
            .with_title("Dune")
            .with_authors(vec!["Frank Herbert"]);
        let low = EnrichmentCandidate::new(SourceTag::GoogleBooks)
            .with_title("Dune (Deluxe Edition)")
            .with_description("Set on the desert planet Arrakis...");

        let merged = merge(&[high, low], &TrustRank::default());
        assert_eq!(merged.title.as_deref(), Some("Dune"));
        assert_eq!(
            merged.description.as_deref(),
            Some("Set on the desert planet Arrakis...")
        );
        assert_eq!(
            merged.provenance.get("description"),
            Some(&SourceTag::GoogleBooks)
        );
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let high = EnrichmentCandidate::new(SourceTag::Oclc).with_title("   ");
        let low = EnrichmentCandidate::new(SourceTag::OpenLibrary).with_title("Real Title");
        let merged = merge(&[high, low], &TrustRank::default());
        assert_eq!(merged.title.as_deref(), Some("Real Title"));
    }

    #[test]
    fn test_fields_never_present_stay_empty() {
        let only = EnrichmentCandidate::new(SourceTag::OpenLibrary).with_title("X");
        let merged = merge(&[only], &TrustRank::default());
        assert!(merged.publisher.is_none());
        assert!(merged.series.is_none());
        assert!(merged.authors.is_empty());
        assert!(!merged.provenance.contains_key("publisher"));
    }

    #[test]
    fn test_identifiers_merged_per_scheme() {
        let high = EnrichmentCandidate::new(SourceTag::OpenLibrary)
            .with_identifier("isbn_13", "9780134685991");
        let low = EnrichmentCandidate::new(SourceTag::GoogleBooks)
            .with_identifier("isbn_13", "9999999999999")
            .with_identifier("isbn_10", "0134685997");
        let merged = merge(&[low, high], &TrustRank::default());
        assert_eq!(merged.isbn13(), Some("9780134685991"));
        assert_eq!(merged.isbn10(), Some("0134685997"));
    }

    #[test]
    fn test_hints_kept_per_source_in_trust_order() {
        let candidates = vec![
            EnrichmentCandidate::new(SourceTag::GoogleBooks),
            EnrichmentCandidate::new(SourceTag::OpenLibrary).with_classification("005.133"),
            EnrichmentCandidate::new(SourceTag::Oclc).with_classification("005.1"),
        ];
        let hints = collect_hints(&candidates, &TrustRank::default());
        assert_eq!(
            hints,
            vec![
                ClassificationHint {
                    source: SourceTag::Oclc,
                    code: "005.1".to_string()
                },
                ClassificationHint {
                    source: SourceTag::OpenLibrary,
                    code: "005.133".to_string()
                },
            ]
        );
    }
}
