//! ISBN normalization, check digits and text scanning.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static ISBN13_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"97[89](?:[- ]?[0-9]){10}").expect("valid ISBN-13 pattern"));

static ISBN10_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9](?:[- ]?[0-9]){8}[- ]?[0-9Xx]\b").expect("valid ISBN-10 pattern")
});

/// Strips prefixes and separators. Returns the bare digits (and trailing X)
/// if the result has a valid check digit.
pub fn normalize(raw: &str) -> Option<String> {
    let lower = raw.trim().to_ascii_lowercase();
    let mut rest = lower.as_str();
    for prefix in ["urn:isbn:", "isbn-13:", "isbn-10:", "isbn13:", "isbn10:", "isbn:", "isbn"] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let compact: String = rest
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '\u{2010}' | '\u{2013}'))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match compact.len() {
        13 if is_valid_isbn13(&compact) => Some(compact),
        10 if is_valid_isbn10(&compact) => Some(compact),
        _ => None,
    }
}

pub fn is_valid_isbn13(s: &str) -> bool {
    if s.len() != 13 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = s
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if i % 2 == 0 {
                d
            } else {
                d * 3
            }
        })
        .sum();
    sum % 10 == 0
}

pub fn is_valid_isbn10(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || !bytes[..9].iter().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let last = match bytes[9] {
        b'X' | b'x' => 10,
        b @ b'0'..=b'9' => (b - b'0') as u32,
        _ => return false,
    };
    let sum: u32 = bytes[..9]
        .iter()
        .enumerate()
        .map(|(i, b)| (10 - i as u32) * (b - b'0') as u32)
        .sum::<u32>()
        + last;
    sum % 11 == 0
}

/// Converts a valid ISBN-10 to its 978-prefixed ISBN-13.
pub fn isbn10_to_13(isbn10: &str) -> Option<String> {
    if !is_valid_isbn10(isbn10) {
        return None;
    }
    let body = format!("978{}", &isbn10[..9]);
    let sum: u32 = body
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if i % 2 == 0 {
                d
            } else {
                d * 3
            }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    Some(format!("{}{}", body, check))
}

/// Converts a 978-prefixed ISBN-13 back to ISBN-10. 979 numbers have none.
pub fn isbn13_to_10(isbn13: &str) -> Option<String> {
    if !is_valid_isbn13(isbn13) || !isbn13.starts_with("978") {
        return None;
    }
    let body = &isbn13[3..12];
    let sum: u32 = body
        .bytes()
        .enumerate()
        .map(|(i, b)| (10 - i as u32) * (b - b'0') as u32)
        .sum();
    let check = (11 - sum % 11) % 11;
    let check = if check == 10 {
        "X".to_string()
    } else {
        check.to_string()
    };
    Some(format!("{}{}", body, check))
}

/// Finds valid ISBNs in free text, ISBN-13 first, in order of appearance.
/// Ten-digit runs inside an ISBN-13 match are not reported again.
pub fn find_in_text(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut spans = Vec::new();

    for m in ISBN13_PATTERN.find_iter(text) {
        if let Some(isbn) = normalize(m.as_str()) {
            spans.push(m.range());
            if !found.contains(&isbn) {
                found.push(isbn);
            }
        }
    }

    for m in ISBN10_PATTERN.find_iter(text) {
        let range = m.range();
        if spans
            .iter()
            .any(|s| range.start < s.end && s.start < range.end)
        {
            continue;
        }
        if let Some(isbn) = normalize(m.as_str()) {
            if !found.contains(&isbn) {
                found.push(isbn);
            }
        }
    }

    found
}
