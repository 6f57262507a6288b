//! Choosing which of several byte-identical intake copies to process.

use std::cmp::Reverse;

use crate::inspector::{BookFormat, SourceFile};

/// Sort key for a copy; the greatest key wins. Copies with more embedded
/// metadata come first, then richer formats, then shorter names, then the
/// oldest record.
fn copy_rank(file: &SourceFile) -> (u8, u8, Reverse<usize>, Reverse<i64>) {
    let described =
        u8::from(file.extracted.title.is_some()) + u8::from(!file.extracted.authors.is_empty());
    let format = match file.format {
        Some(BookFormat::Epub) => 3,
        Some(BookFormat::Pdf) => 2,
        Some(BookFormat::Mobi) | Some(BookFormat::Azw3) => 1,
        _ => 0,
    };
    (
        described,
        format,
        Reverse(file.file_name().chars().count()),
        Reverse(file.id.unwrap_or(i64::MAX)),
    )
}

/// The copy to keep working on, if any.
pub(crate) fn best_copy(copies: &[SourceFile]) -> Option<&SourceFile> {
    copies.iter().max_by_key(|file| copy_rank(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{Checksums, ExtractedMetadata};
    use std::path::PathBuf;

    fn copy(id: i64, name: &str, format: BookFormat, title: Option<&str>) -> SourceFile {
        let mut file = SourceFile::new(
            PathBuf::from("/intake").join(name),
            Checksums {
                sha256: "same".to_string(),
                md5: "same".to_string(),
            },
            Some(format),
            10,
            ExtractedMetadata {
                title: title.map(str::to_string),
                ..Default::default()
            },
        );
        file.id = Some(id);
        file
    }

    #[test]
    fn test_metadata_beats_shorter_name() {
        let copies = vec![
            copy(1, "a.epub", BookFormat::Epub, None),
            copy(2, "a much longer name.epub", BookFormat::Epub, Some("Dune")),
        ];
        assert_eq!(best_copy(&copies).and_then(|f| f.id), Some(2));
    }

    #[test]
    fn test_shorter_name_then_oldest() {
        let copies = vec![
            copy(1, "dune (1).epub", BookFormat::Epub, Some("Dune")),
            copy(2, "dune.epub", BookFormat::Epub, Some("Dune")),
            copy(3, "dune.epub", BookFormat::Epub, Some("Dune")),
        ];
        assert_eq!(best_copy(&copies).and_then(|f| f.id), Some(2));
    }

    #[test]
    fn test_format_order() {
        let copies = vec![
            copy(1, "x.mobi", BookFormat::Mobi, None),
            copy(2, "x.pdf", BookFormat::Pdf, None),
        ];
        assert_eq!(best_copy(&copies).and_then(|f| f.id), Some(2));
        assert!(best_copy(&[]).is_none());
    }
}
