//! Metadata guessed from file and folder names.
//!
//! Recognized shapes:
//! - `Author - Title`
//! - `Author - Series NN - Title`
//! - `Title by Author`

use std::path::Path;

use crate::inspector::types::{ExtractedMetadata, SeriesInfo};

pub fn extract(path: &Path) -> ExtractedMetadata {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    parse_name(&stem)
}

/// Parses a bare name (no extension).
pub fn parse_name(name: &str) -> ExtractedMetadata {
    let cleaned = clean_name(name);
    let mut meta = ExtractedMetadata::default();
    if cleaned.is_empty() {
        return meta;
    }

    let parts: Vec<&str> = cleaned
        .split(" - ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    match parts.as_slice() {
        [author, series, title] => {
            meta.authors = vec![author.to_string()];
            meta.title = Some(title.to_string());
            meta.series = Some(parse_series(series));
        }
        [author, title] => {
            meta.authors = vec![author.to_string()];
            meta.title = Some(title.to_string());
        }
        _ => {
            if let Some((title, author)) = split_by_author(&cleaned) {
                meta.title = Some(title);
                meta.authors = vec![author];
            } else {
                meta.title = Some(cleaned);
            }
        }
    }

    meta
}

/// "Mistborn 02" -> ("Mistborn", 2.0); "Discworld" -> ("Discworld", None)
fn parse_series(raw: &str) -> SeriesInfo {
    let raw = raw.trim();
    if let Some((name, index)) = raw.rsplit_once(' ') {
        let index = index.trim_start_matches('#');
        if let Ok(value) = index.parse::<f32>() {
            return SeriesInfo::new(name.trim(), Some(value));
        }
    }
    SeriesInfo::new(raw, None)
}

fn split_by_author(name: &str) -> Option<(String, String)> {
    let lower = name.to_lowercase();
    let at = lower.rfind(" by ")?;
    let title = name[..at].trim();
    let author = name[at + 4..].trim();
    if title.is_empty() || author.is_empty() {
        return None;
    }
    Some((title.to_string(), author.to_string()))
}

/// Drops release cruft: underscores, bracketed tags, trailing years.
fn clean_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            '_' if depth == 0 => out.push(' '),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
