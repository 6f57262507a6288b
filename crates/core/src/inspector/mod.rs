//! Inspector: checksum, format detection and embedded metadata for one
//! intake file.
//!
//! Inspection only reads. The checksum is computed before anything is
//! parsed so duplicates can be recognized without paying for extraction.
//! Extraction problems degrade to partial metadata; only I/O failures and
//! unrecognized containers are errors.

mod checksum;
mod detect;
pub mod extract;
mod scan;
mod types;

pub use checksum::{compute_checksums, sha256_file};
pub use detect::detect_format;
pub use extract::{ExtractError, Extraction, Extractor};
pub use scan::{scan_intake, ScanError};
pub use types::*;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that end inspection of a file. Both still leave a `failed` record.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Unreadable file {path}: {reason}")]
    UnreadableFile {
        path: PathBuf,
        reason: String,
        checksums: Option<Checksums>,
    },

    #[error("Unsupported format: {path}")]
    UnsupportedFormat {
        path: PathBuf,
        checksums: Checksums,
        size_bytes: u64,
    },
}

impl InspectError {
    pub fn path(&self) -> &Path {
        match self {
            InspectError::UnreadableFile { path, .. } => path,
            InspectError::UnsupportedFormat { path, .. } => path,
        }
    }

    /// The `failed` source file that records this error.
    pub fn into_failed_record(self) -> SourceFile {
        let reason = self.to_string();
        match self {
            InspectError::UnreadableFile {
                path, checksums, ..
            } => SourceFile::failed(path, checksums, reason),
            InspectError::UnsupportedFormat {
                path,
                checksums,
                size_bytes,
            } => {
                let mut file = SourceFile::failed(path, Some(checksums), reason);
                file.size_bytes = size_bytes;
                file
            }
        }
    }
}

/// Result of inspecting one file.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub source_file: SourceFile,
    /// Early text of the book, used only when no identifier is embedded.
    pub content_sample: Option<String>,
}

/// Reads a file and describes it.
pub async fn inspect(path: &Path) -> Result<Inspection, InspectError> {
    let (checksums, size_bytes) =
        compute_checksums(path)
            .await
            .map_err(|e| InspectError::UnreadableFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
                checksums: None,
            })?;

    let owned = path.to_path_buf();
    let sums = checksums.clone();
    tokio::task::spawn_blocking(move || inspect_blocking(&owned, sums, size_bytes))
        .await
        .map_err(|e| InspectError::UnreadableFile {
            path: path.to_path_buf(),
            reason: format!("inspection task failed: {}", e),
            checksums: Some(checksums),
        })?
}

fn inspect_blocking(
    path: &Path,
    checksums: Checksums,
    size_bytes: u64,
) -> Result<Inspection, InspectError> {
    let format = match detect_format(path) {
        Ok(Some(format)) => format,
        Ok(None) => {
            return Err(InspectError::UnsupportedFormat {
                path: path.to_path_buf(),
                checksums,
                size_bytes,
            })
        }
        Err(e) => {
            return Err(InspectError::UnreadableFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
                checksums: Some(checksums),
            })
        }
    };

    let extractor = Extractor::for_format(format);
    let extraction = match extractor.extract(path) {
        Ok(extraction) => extraction,
        Err(e) => {
            debug!(
                path = %path.display(),
                extractor = extractor.name(),
                error = %e,
                "Extraction failed, continuing with partial metadata"
            );
            Extraction::default()
        }
    };

    let mut metadata = extraction.metadata;
    if let Some(sidecar) = read_sidecar(path) {
        metadata.fill_from(sidecar);
    }
    metadata.fill_from(extract::filename::extract(path));

    debug!(
        path = %path.display(),
        format = %format,
        title = ?metadata.title,
        "Inspected file"
    );

    Ok(Inspection {
        source_file: SourceFile::new(
            path.to_path_buf(),
            checksums,
            Some(format),
            size_bytes,
            metadata,
        ),
        content_sample: extraction.content_sample,
    })
}

/// Sidecar OPF next to the file: `<stem>.opf`, or a calibre-style
/// `metadata.opf` when the folder holds only this book.
fn read_sidecar(path: &Path) -> Option<ExtractedMetadata> {
    let dir = path.parent()?;
    let stem = path.file_stem()?.to_string_lossy().to_string();

    let named = dir.join(format!("{}.opf", stem));
    let candidate = if named.is_file() {
        named
    } else {
        let calibre = dir.join("metadata.opf");
        if !calibre.is_file() || !folder_holds_single_book(dir, &stem) {
            return None;
        }
        calibre
    };

    let xml = std::fs::read_to_string(&candidate).ok()?;
    match extract::opf::parse_opf(&xml) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!(path = %candidate.display(), error = %e, "Ignoring unreadable sidecar");
            None
        }
    }
}

fn folder_holds_single_book(dir: &Path, stem: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().all(|entry| {
        let path = entry.path();
        if !path.is_file() {
            return true;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if BookFormat::parse(&ext).is_none() {
            return true;
        }
        path.file_stem()
            .map(|s| s.to_string_lossy() == stem)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{self, EpubSpec};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_inspect_epub() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("upload.epub");
        fixtures::write_epub(
            &path,
            &EpubSpec {
                title: Some("Clean Architecture".to_string()),
                authors: vec!["Robert C. Martin".to_string()],
                identifiers: vec!["9780134494166".to_string()],
                ..Default::default()
            },
        );

        let inspection = inspect(&path).await.unwrap();
        let file = inspection.source_file;
        assert_eq!(file.format, Some(BookFormat::Epub));
        assert_eq!(file.status, SourceStatus::Pending);
        assert_eq!(file.checksums.sha256.len(), 64);
        assert_eq!(file.checksums.md5.len(), 32);
        assert_eq!(file.extracted.title.as_deref(), Some("Clean Architecture"));
    }

    #[tokio::test]
    async fn test_inspect_unsupported_keeps_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("readme.txt");
        std::fs::write(&path, b"not a book at all").unwrap();

        let err = inspect(&path).await.unwrap_err();
        assert!(matches!(err, InspectError::UnsupportedFormat { .. }));
        let record = err.into_failed_record();
        assert_eq!(record.status, SourceStatus::Failed);
        assert_eq!(record.checksums.sha256.len(), 64);
        assert!(record.error.unwrap().contains("Unsupported format"));
    }

    #[tokio::test]
    async fn test_inspect_missing_file_is_unreadable() {
        let err = inspect(Path::new("/nonexistent/book.epub")).await.unwrap_err();
        assert!(matches!(err, InspectError::UnreadableFile { checksums: None, .. }));
    }

    #[tokio::test]
    async fn test_broken_epub_falls_back_to_filename() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Iain M. Banks - Excession.epub");
        fixtures::write_zip(
            &path,
            &[("mimetype", b"application/epub+zip".as_slice())],
        );

        let inspection = inspect(&path).await.unwrap();
        let meta = inspection.source_file.extracted;
        assert_eq!(meta.title.as_deref(), Some("Excession"));
        assert_eq!(meta.authors, vec!["Iain M. Banks"]);
    }

    #[tokio::test]
    async fn test_sidecar_fills_missing_fields() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("book");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scan.djvu");
        std::fs::write(&path, b"AT&TFORM\x00\x00\x00\x10DJVUINFO").unwrap();
        std::fs::write(
            dir.join("metadata.opf"),
            r#"<package><metadata>
                <dc:title>A Pattern Language</dc:title>
                <dc:creator>Christopher Alexander</dc:creator>
            </metadata></package>"#,
        )
        .unwrap();

        let inspection = inspect(&path).await.unwrap();
        let meta = inspection.source_file.extracted;
        assert_eq!(inspection.source_file.format, Some(BookFormat::Djvu));
        assert_eq!(meta.title.as_deref(), Some("A Pattern Language"));
        assert_eq!(meta.authors, vec!["Christopher Alexander"]);
    }
}
