//! Canonical names and library locations.
//!
//! ```text
//! <root>/Fiction/<stem>/<stem>.<ext>
//! <root>/Non-Fiction/<NNN-NNN>/<stem>/<stem>.<ext>
//! <root>/Non-Fiction/Unclassified/<stem>/<stem>.<ext>
//! ```
//!
//! where `<stem>` is `Author - Title`, `Author - Series NN - Title` or
//! `Author & Author - Title`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{AuthorFormat, LibraryConfig};
use crate::enricher::{ddc_class, MergedMetadata};
use crate::inspector::SeriesInfo;

/// Longest file or folder name produced, extension included.
pub const MAX_NAME_CHARS: usize = 200;

const UNSAFE_CHARS: &[char] = &['<', '>', '"', '/', '\\', '|', '?', '*'];

/// Where a file would go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingPlan {
    /// Absolute target path of the file.
    pub target: PathBuf,
    /// Absolute item folder.
    pub folder: PathBuf,
    /// Target relative to the library root, `/`-separated.
    pub relative: String,
}

/// Cleans one name component: unsafe and control characters dropped,
/// `:` turned into ` -`, whitespace collapsed, outer dots and spaces
/// trimmed.
pub fn sanitize_component(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ':' => cleaned.push_str(" -"),
            ';' => cleaned.push(','),
            c if c.is_whitespace() => cleaned.push(' '),
            c if c.is_control() || UNSAFE_CHARS.contains(&c) => {}
            c => cleaned.push(c),
        }
    }
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == '.' || c == ' ')
        .to_string()
}

/// Formats an author name, swapping between `First Last` and `Last, First`.
pub fn format_author(name: &str, format: AuthorFormat) -> String {
    let name = name.trim();
    let formatted = match format {
        AuthorFormat::FirstLast => match name.split_once(", ") {
            Some((last, first)) if !first.trim().is_empty() => format!("{} {}", first, last),
            _ => name.to_string(),
        },
        AuthorFormat::LastFirst if !name.contains(", ") => match name.rsplit_once(' ') {
            Some((first, last)) => format!("{}, {}", last, first),
            None => name.to_string(),
        },
        AuthorFormat::LastFirst => name.to_string(),
    };
    let cleaned = sanitize_component(&formatted);
    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned
    }
}

/// `Author - Title`, with a series segment when known. Capped at
/// [`MAX_NAME_CHARS`].
pub fn canonical_stem(
    authors: &[String],
    title: Option<&str>,
    series: Option<&SeriesInfo>,
    format: AuthorFormat,
) -> String {
    let named: Vec<String> = authors
        .iter()
        .filter(|a| !a.trim().is_empty())
        .take(2)
        .map(|a| format_author(a, format))
        .collect();
    let author = if named.is_empty() {
        "Unknown".to_string()
    } else {
        named.join(" & ")
    };

    let title = title
        .map(sanitize_component)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let series = series.and_then(|s| {
        let name = sanitize_component(&s.name);
        if name.is_empty() {
            return None;
        }
        Some(match s.index {
            Some(index) if index >= 0.0 => format!("{} {:02}", name, index.trunc() as u32),
            _ => name,
        })
    });

    let stem = match series {
        Some(series) => format!("{} - {} - {}", author, series, title),
        None => format!("{} - {}", author, title),
    };
    truncate_chars(&stem, MAX_NAME_CHARS)
}

/// Full file name: the stem, shortened so stem and extension together fit
/// [`MAX_NAME_CHARS`].
pub fn canonical_name(
    authors: &[String],
    title: Option<&str>,
    series: Option<&SeriesInfo>,
    extension: &str,
    format: AuthorFormat,
) -> String {
    let extension = extension.trim_start_matches('.');
    let stem = canonical_stem(authors, title, series, format);
    let room = MAX_NAME_CHARS.saturating_sub(extension.chars().count() + 1);
    format!("{}.{}", truncate_chars(&stem, room), extension)
}

/// Hundreds bucket of a classification code: `"005.1"` is `"000-099"`.
pub fn code_range_folder(code: &str) -> Option<String> {
    let class = ddc_class(code)?;
    let start = (class / 100) * 100;
    Some(format!("{:03}-{:03}", start, start + 99))
}

/// Where a book with this metadata is filed.
pub fn plan_target(
    library: &LibraryConfig,
    merged: &MergedMetadata,
    code: Option<&str>,
    fiction: bool,
    extension: &str,
) -> FilingPlan {
    let stem = canonical_stem(
        &merged.authors,
        merged.title.as_deref(),
        merged.series.as_ref(),
        library.author_format,
    );
    let name = canonical_name(
        &merged.authors,
        merged.title.as_deref(),
        merged.series.as_ref(),
        extension,
        library.author_format,
    );

    let mut relative_dirs = Vec::new();
    if fiction {
        relative_dirs.push(library.fiction_dir.clone());
    } else {
        relative_dirs.push(library.non_fiction_dir.clone());
        relative_dirs.push(
            code.and_then(code_range_folder)
                .unwrap_or_else(|| "Unclassified".to_string()),
        );
    }
    relative_dirs.push(stem);

    let mut folder = library.root.clone();
    for dir in &relative_dirs {
        folder.push(dir);
    }
    let target = folder.join(&name);
    relative_dirs.push(name);

    FilingPlan {
        target,
        folder,
        relative: relative_dirs.join("/"),
    }
}

/// `path` relative to `root` with `/` separators, if it lies inside.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    cut.trim_end_matches(|c: char| c == ' ' || c == '.' || c == '-')
        .to_string()
}
