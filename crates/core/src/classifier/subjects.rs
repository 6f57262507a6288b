//! Subject heading to classification code table.
//!
//! The table is an ordered list of (pattern, code) pairs. Lookup normalizes
//! every subject, splits compound headings ("Fiction / Fantasy / Epic",
//! "Computer programming -- Handbooks") into pieces, then takes the first
//! table entry, in table order, that equals any piece or is a word-boundary
//! prefix of one. A specific pattern must therefore precede any shorter
//! pattern that prefixes it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ClassifierError;

const BUILTIN_VERSION: &str = "builtin-1";

/// Built-in mapping. Literature entries come first so that compound fiction
/// headings win over the generic subject words they start with.
const BUILTIN: &[(&str, &str)] = &[
    // Literature and fiction
    ("fantasy fiction", "813"),
    ("science fiction", "823"),
    ("historical fiction", "823"),
    ("literary fiction", "823"),
    ("children's fiction", "823"),
    ("juvenile fiction", "823"),
    ("detective and mystery stories", "823"),
    ("american fiction", "813"),
    ("english fiction", "823"),
    ("british fiction", "823"),
    ("german fiction", "833"),
    ("french fiction", "843"),
    ("italian fiction", "853"),
    ("spanish fiction", "863"),
    ("russian fiction", "891.73"),
    ("japanese fiction", "895.63"),
    ("chinese fiction", "895.13"),
    ("literary criticism", "801"),
    ("literary collections", "808"),
    ("fiction", "823"),
    ("fantasy", "823"),
    ("epic fantasy", "823"),
    ("urban fantasy", "823"),
    ("mystery", "823"),
    ("thriller", "823"),
    ("romance", "823"),
    ("horror", "823"),
    ("young adult", "823"),
    ("adventure", "823"),
    ("dystopian", "823"),
    ("crime", "823"),
    ("detective", "823"),
    ("suspense", "823"),
    ("space opera", "823"),
    ("cyberpunk", "823"),
    ("steampunk", "823"),
    ("poetry", "808"),
    ("essays", "808"),
    ("literature", "800"),
    // 000 Computer science, information and general works
    ("computer science", "004"),
    ("computers", "004"),
    ("computing", "004"),
    ("computer programming", "005"),
    ("programming", "005"),
    ("software engineering", "005"),
    ("software development", "005"),
    ("software", "005"),
    ("databases", "005"),
    ("cybersecurity", "005"),
    ("computer security", "005"),
    ("python", "005"),
    ("javascript", "005"),
    ("java", "005"),
    ("c++", "005"),
    ("rust", "005"),
    ("web development", "006"),
    ("artificial intelligence", "006"),
    ("machine learning", "006"),
    ("data science", "006"),
    ("networking", "004"),
    // 100 Philosophy and psychology
    ("philosophy", "100"),
    ("ethics", "170"),
    ("logic", "160"),
    ("psychology", "150"),
    ("self-help", "158"),
    ("personal development", "158"),
    ("mindfulness", "158"),
    ("meditation", "158"),
    // 200 Religion
    ("religion", "200"),
    ("mythology", "201"),
    ("spirituality", "204"),
    ("bible", "220"),
    ("christianity", "230"),
    ("buddhism", "294"),
    ("hinduism", "294"),
    ("judaism", "296"),
    ("islam", "297"),
    // 300 Social sciences
    ("social science", "300"),
    ("sociology", "301"),
    ("anthropology", "301"),
    ("gender studies", "305"),
    ("feminism", "305"),
    ("political science", "320"),
    ("politics", "320"),
    ("government", "320"),
    ("economics", "330"),
    ("finance", "332"),
    ("investing", "332"),
    ("law", "340"),
    ("education", "370"),
    ("teaching", "371"),
    // 400 Language
    ("english language", "420"),
    ("german language", "430"),
    ("french language", "440"),
    ("spanish language", "460"),
    ("linguistics", "410"),
    ("grammar", "415"),
    ("translation", "418"),
    ("language", "400"),
    // 500 Science
    ("mathematics", "510"),
    ("algebra", "512"),
    ("calculus", "515"),
    ("geometry", "516"),
    ("statistics", "519"),
    ("astronomy", "520"),
    ("cosmology", "523"),
    ("physics", "530"),
    ("chemistry", "540"),
    ("earth science", "550"),
    ("geology", "551"),
    ("meteorology", "551"),
    ("biology", "570"),
    ("evolution", "576"),
    ("genetics", "576"),
    ("ecology", "577"),
    ("botany", "580"),
    ("zoology", "590"),
    ("science", "500"),
    // 600 Technology
    ("medicine", "610"),
    ("health", "613"),
    ("nutrition", "613"),
    ("engineering", "620"),
    ("electronics", "621"),
    ("automotive", "629"),
    ("aviation", "629"),
    ("agriculture", "630"),
    ("gardening", "635"),
    ("pets", "636"),
    ("cooking", "641"),
    ("cookbooks", "641"),
    ("business", "650"),
    ("manufacturing", "670"),
    ("construction", "690"),
    ("technology", "600"),
    // 700 Arts and recreation
    ("architecture", "720"),
    ("sculpture", "730"),
    ("drawing", "741"),
    ("crafts", "745"),
    ("painting", "750"),
    ("photography", "770"),
    ("music", "780"),
    ("recreation", "790"),
    ("film", "791"),
    ("television", "791"),
    ("theater", "792"),
    ("theatre", "792"),
    ("drama", "792"),
    ("dance", "793"),
    ("games", "794"),
    ("sports", "796"),
    ("art", "700"),
    ("arts", "700"),
    // 900 History and geography
    ("biography", "920"),
    ("autobiography", "920"),
    ("memoirs", "920"),
    ("memoir", "920"),
    ("travel", "910"),
    ("geography", "910"),
    ("world history", "909"),
    ("ancient history", "930"),
    ("archaeology", "930"),
    ("european history", "940"),
    ("british history", "941"),
    ("asian history", "950"),
    ("african history", "960"),
    ("american history", "973"),
    ("history", "900"),
];

/// One (pattern, code) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectEntry {
    pub pattern: String,
    pub code: String,
}

/// A subject match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMatch {
    pub code: String,
    /// The normalized subject piece that matched.
    pub subject: String,
}

/// Versioned, ordered subject table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTable {
    pub version: String,
    #[serde(default)]
    pub entries: Vec<SubjectEntry>,
}

impl SubjectTable {
    /// Builds a table; patterns are normalized the same way subjects are.
    pub fn new(version: impl Into<String>, entries: Vec<(String, String)>) -> Self {
        Self {
            version: version.into(),
            entries: entries
                .into_iter()
                .map(|(pattern, code)| SubjectEntry {
                    pattern: normalize_subject(&pattern),
                    code,
                })
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_VERSION,
            BUILTIN
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        )
    }

    /// Parses a table from TOML:
    ///
    /// ```toml
    /// version = "house-2"
    ///
    /// [[entries]]
    /// pattern = "fantasy fiction"
    /// code = "813"
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ClassifierError> {
        let raw: SubjectTable =
            toml::from_str(content).map_err(|e| ClassifierError::TableParse(e.to_string()))?;
        if raw.entries.is_empty() {
            return Err(ClassifierError::TableParse(
                "subject table has no entries".to_string(),
            ));
        }
        for entry in &raw.entries {
            if crate::enricher::normalize_ddc(&entry.code).is_none() {
                return Err(ClassifierError::TableParse(format!(
                    "entry '{}' has invalid code '{}'",
                    entry.pattern, entry.code
                )));
            }
        }
        Ok(Self::new(
            raw.version,
            raw.entries
                .into_iter()
                .map(|e| (e.pattern, e.code))
                .collect(),
        ))
    }

    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path).map_err(|e| ClassifierError::TableRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maps subjects to a code; see the module docs for match order.
    pub fn lookup<S: AsRef<str>>(&self, subjects: &[S]) -> Option<SubjectMatch> {
        let pieces: Vec<String> = subjects
            .iter()
            .flat_map(|s| split_compound(s.as_ref()))
            .collect();
        if pieces.is_empty() {
            return None;
        }

        let found = self.entries.iter().find_map(|entry| {
            pieces
                .iter()
                .find(|piece| **piece == entry.pattern || is_word_prefix(&entry.pattern, piece))
                .map(|piece| (entry, piece))
        });

        found.map(|(entry, piece)| SubjectMatch {
            code: entry.code.clone(),
            subject: piece.clone(),
        })
    }
}

impl Default for SubjectTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Lowercase, trim, collapse internal whitespace, drop a trailing period.
pub fn normalize_subject(subject: &str) -> String {
    let collapsed = subject
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed.trim_end_matches('.').trim_end().to_string()
}

fn split_compound(subject: &str) -> Vec<String> {
    subject
        .split("--")
        .flat_map(|part| part.split(['/', '>', '|']))
        .map(normalize_subject)
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn is_word_prefix(pattern: &str, piece: &str) -> bool {
    match piece.strip_prefix(pattern) {
        Some(rest) => rest
            .chars()
            .next()
            .is_some_and(|c| !c.is_alphanumeric()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fantasy_fiction_maps_to_813() {
        let table = SubjectTable::builtin();
        let found = table.lookup(&["Fantasy fiction"]).unwrap();
        assert_eq!(found.code, "813");
        assert_eq!(found.subject, "fantasy fiction");
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_subject("  Computer   Programming. "), "computer programming");
        assert_eq!(normalize_subject("Fiction"), "fiction");
    }

    #[test]
    fn test_compound_headings_split() {
        let table = SubjectTable::builtin();
        let found = table
            .lookup(&["Computers / Programming Languages / Java"])
            .unwrap();
        // "computers" is earlier in the table than "java".
        assert_eq!(found.code, "004");

        let found = table
            .lookup(&["Computer programming -- Handbooks, manuals, etc."])
            .unwrap();
        assert_eq!(found.code, "005");
    }

    #[test]
    fn test_earlier_prefix_beats_later_exact() {
        let table = SubjectTable::new(
            "t",
            vec![
                ("history".to_string(), "900".to_string()),
                ("history of science".to_string(), "509".to_string()),
            ],
        );
        let found = table.lookup(&["History of science"]).unwrap();
        assert_eq!(found.code, "900");

        let table = SubjectTable::new(
            "t",
            vec![
                ("history of science".to_string(), "509".to_string()),
                ("history".to_string(), "900".to_string()),
            ],
        );
        assert_eq!(table.lookup(&["History of science"]).unwrap().code, "509");
    }

    #[test]
    fn test_builtin_has_no_shadowed_patterns() {
        let table = SubjectTable::builtin();
        for (i, earlier) in table.entries.iter().enumerate() {
            for later in &table.entries[i + 1..] {
                assert!(
                    !is_word_prefix(&earlier.pattern, &later.pattern),
                    "{:?} hides {:?}",
                    earlier.pattern,
                    later.pattern
                );
            }
        }
    }

    #[test]
    fn test_prefix_requires_word_boundary() {
        let table = SubjectTable::new("t", vec![("art".to_string(), "700".to_string())]);
        assert!(table.lookup(&["Artificial intelligence"]).is_none());
        assert_eq!(table.lookup(&["Art, Modern"]).unwrap().code, "700");
    }

    #[test]
    fn test_table_order_decides() {
        let table = SubjectTable::new(
            "t",
            vec![
                ("physics".to_string(), "530".to_string()),
                ("chemistry".to_string(), "540".to_string()),
            ],
        );
        let found = table.lookup(&["Chemistry", "Physics"]).unwrap();
        assert_eq!(found.code, "530");
    }

    #[test]
    fn test_no_match() {
        let table = SubjectTable::builtin();
        assert!(table.lookup(&["Xyzzy"]).is_none());
        assert!(table.lookup::<&str>(&[]).is_none());
    }

    #[test]
    fn test_from_toml() {
        let table = SubjectTable::from_toml(
            r#"
version = "house-2"

[[entries]]
pattern = "Knitting"
code = "746.432"
"#,
        )
        .unwrap();
        assert_eq!(table.version, "house-2");
        assert_eq!(table.lookup(&["knitting"]).unwrap().code, "746.432");
    }

    #[test]
    fn test_from_toml_rejects_bad_code() {
        let result = SubjectTable::from_toml(
            r#"
version = "bad"

[[entries]]
pattern = "knitting"
code = "TT820"
"#,
        );
        assert!(matches!(result, Err(ClassifierError::TableParse(_))));
    }
}
