//! Moving files into the library, with rollback.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use super::FilerError;

const BUFFER_SIZE: usize = 64 * 1024;

/// What a placement changed, so it can be undone.
#[derive(Debug, Default)]
pub(crate) struct RollbackPlan {
    /// `(placed, origin)` of the moved file.
    moved: Option<(PathBuf, PathBuf)>,
    /// Directories created for the target, parent first.
    created_directories: Vec<PathBuf>,
}

impl RollbackPlan {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn record_move(&mut self, placed: PathBuf, origin: PathBuf) {
        self.moved = Some((placed, origin));
    }

    fn record_directory(&mut self, path: PathBuf) {
        self.created_directories.push(path);
    }
}

/// Renames when possible. `Ok(false)` means the paths are on different
/// filesystems and the caller has to copy.
async fn try_rename(from: &Path, to: &Path) -> Result<bool, std::io::Error> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(true),
        Err(e) => {
            // EXDEV is 18 on Linux
            if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                Ok(false)
            } else {
                Err(e)
            }
        }
    }
}

/// Copies `from` to `to`, returning the SHA-256 of what was written.
async fn copy_with_digest(from: &Path, to: &Path) -> Result<String, FilerError> {
    let copy_failed = |e: std::io::Error| FilerError::move_failed(from, to, e);

    let source = File::open(from).await.map_err(copy_failed)?;
    let dest = File::create(to).await.map_err(copy_failed)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).await.map_err(copy_failed)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        writer
            .write_all(&buffer[..bytes_read])
            .await
            .map_err(copy_failed)?;
    }
    writer.flush().await.map_err(copy_failed)?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Creates the parents of `path`, recording each new directory.
async fn ensure_parent_dirs(path: &Path, plan: &mut RollbackPlan) -> Result<(), FilerError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }

    let mut missing = Vec::new();
    let mut current = parent;
    while !current.exists() {
        missing.push(current.to_path_buf());
        current = match current.parent() {
            Some(p) => p,
            None => break,
        };
    }

    fs::create_dir_all(parent)
        .await
        .map_err(|e| FilerError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;

    for dir in missing.into_iter().rev() {
        plan.record_directory(dir);
    }
    Ok(())
}

/// Moves `from` to `to`. Cross-device moves copy, check the digest against
/// `expected_sha256` when `verify` is set, and only then remove the origin.
pub(crate) async fn move_file(
    from: &Path,
    to: &Path,
    expected_sha256: &str,
    verify: bool,
    plan: &mut RollbackPlan,
) -> Result<(), FilerError> {
    ensure_parent_dirs(to, plan).await?;

    let renamed = try_rename(from, to)
        .await
        .map_err(|e| FilerError::move_failed(from, to, e))?;

    if !renamed {
        debug!(from = %from.display(), to = %to.display(), "Cross-device move, copying");
        let written = copy_with_digest(from, to).await?;
        if verify && written != expected_sha256 {
            let _ = fs::remove_file(to).await;
            return Err(FilerError::ChecksumMismatch {
                path: to.to_path_buf(),
                expected: expected_sha256.to_string(),
                actual: written,
            });
        }
        fs::remove_file(from)
            .await
            .map_err(|e| FilerError::Io {
                path: from.to_path_buf(),
                source: e,
            })?;
    }

    plan.record_move(to.to_path_buf(), from.to_path_buf());
    Ok(())
}

/// Undoes a placement: the file goes back to its origin and directories
/// created for it are removed when empty. Returns the failures.
pub(crate) async fn rollback(plan: RollbackPlan) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if let Some((placed, origin)) = &plan.moved {
        let restored = match try_rename(placed, origin).await {
            Ok(true) => Ok(()),
            Ok(false) => match copy_with_digest(placed, origin).await {
                Ok(_) => fs::remove_file(placed).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = restored {
            errors.push(format!(
                "Failed to move {} back to {}: {}",
                placed.display(),
                origin.display(),
                e
            ));
        }
    }

    for dir in plan.created_directories.iter().rev() {
        if is_empty_dir(dir).await {
            if let Err(e) = fs::remove_dir(dir).await {
                errors.push(format!("Failed to remove {}: {}", dir.display(), e));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Removes empty directories from `start` upward, stopping below `stop`.
/// Directories outside `stop` are never touched.
pub(crate) async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current != stop && current.starts_with(stop) {
        if !is_empty_dir(&current).await {
            break;
        }
        if let Err(e) = fs::remove_dir(&current).await {
            warn!(path = %current.display(), error = %e, "Could not prune intake directory");
            break;
        }
        debug!(path = %current.display(), "Pruned empty intake directory");
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}

async fn is_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}
