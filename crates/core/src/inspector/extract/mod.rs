//! Format-specific metadata extractors.
//!
//! The set of extractors is closed: [`Extractor::for_format`] picks one from
//! the detected container format, and every variant answers the same
//! [`Extractor::extract`] call.

mod epub;
pub mod filename;
mod mobi;
pub mod opf;
mod pdf;

use std::path::Path;
use thiserror::Error;

use super::types::{BookFormat, ExtractedMetadata};

/// Upper bound on the content sample handed to identifier scanning.
pub(crate) const SAMPLE_LIMIT: usize = 64 * 1024;

/// Errors from parsing a container. Never fatal to inspection.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Malformed container: {0}")]
    Malformed(String),
}

/// What an extractor found.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub metadata: ExtractedMetadata,
    /// Plain text from the start of the book, for identifier scanning.
    pub content_sample: Option<String>,
}

/// One variant per supported container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    Epub,
    Pdf,
    Mobi,
    /// Containers without descriptive metadata (DjVu, comic archives).
    Filename,
}

impl Extractor {
    pub fn for_format(format: BookFormat) -> Self {
        match format {
            BookFormat::Epub => Extractor::Epub,
            BookFormat::Pdf => Extractor::Pdf,
            BookFormat::Mobi | BookFormat::Azw3 => Extractor::Mobi,
            BookFormat::Djvu | BookFormat::Cbz | BookFormat::Cbr => Extractor::Filename,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Extractor::Epub => "epub",
            Extractor::Pdf => "pdf",
            Extractor::Mobi => "mobi",
            Extractor::Filename => "filename",
        }
    }

    /// Reads embedded descriptive fields from `path`.
    pub fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        match self {
            Extractor::Epub => epub::extract(path),
            Extractor::Pdf => pdf::extract(path),
            Extractor::Mobi => mobi::extract(path),
            Extractor::Filename => Ok(Extraction {
                metadata: filename::extract(path),
                content_sample: None,
            }),
        }
    }
}

/// Removes tags and decodes the common entities from (X)HTML.
pub(crate) fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&ndash;", "-")
        .replace("&#8211;", "-")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_format() {
        assert_eq!(Extractor::for_format(BookFormat::Azw3), Extractor::Mobi);
        assert_eq!(Extractor::for_format(BookFormat::Cbz), Extractor::Filename);
        assert_eq!(Extractor::for_format(BookFormat::Epub), Extractor::Epub);
    }

    #[test]
    fn test_strip_markup() {
        let html = "<p>ISBN&nbsp;978&ndash;0&ndash;13</p>\n<p>Tom &amp; Jerry</p>";
        assert_eq!(strip_markup(html), "ISBN 978-0-13 Tom & Jerry");
    }

    #[test]
    fn test_filename_extractor_never_fails() {
        let extraction = Extractor::Filename
            .extract(Path::new("/nowhere/Terry Pratchett - Mort.cbz"))
            .unwrap();
        assert_eq!(extraction.metadata.title.as_deref(), Some("Mort"));
    }
}
