//! Intake area discovery.

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Intake directory not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Names never treated as intake work.
const IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", "@eaDir"];
/// Extensions of sidecars and partial downloads.
const IGNORED_EXTENSIONS: &[&str] = &["opf", "part", "tmp", "crdownload"];

/// Lists candidate files under the intake area, sorted by path.
///
/// Hidden entries, OS cruft, sidecar metadata and cover images are skipped.
/// Unreadable entries are logged and skipped.
pub fn scan_intake(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !root.exists() {
        return Err(ScanError::PathNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || should_visit(e));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() && !is_sidecar(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable intake entry"),
        }
    }

    files.sort();
    tracing::debug!(root = %root.display(), count = files.len(), "Scanned intake area");
    Ok(files)
}

fn should_visit(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    !name.starts_with('.') && !IGNORED_NAMES.iter().any(|n| *n == name)
}

fn is_sidecar(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if IGNORED_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    stem == "cover" && matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp")
}
