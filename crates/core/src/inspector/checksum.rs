//! Streaming content digests.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

use super::types::Checksums;

const BUFFER_SIZE: usize = 8192;

/// Computes SHA-256 and MD5 of a file in one pass.
pub async fn compute_checksums(path: &Path) -> std::io::Result<(Checksums, u64)> {
    let file = File::open(path).await?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    let mut sha = Sha256::new();
    let mut md5 = md5::Context::new();
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        sha.update(&buffer[..bytes_read]);
        md5.consume(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((
        Checksums {
            sha256: format!("{:x}", sha.finalize()),
            md5: format!("{:x}", md5.compute()),
        },
        total,
    ))
}

/// SHA-256 only, used to verify copies.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    compute_checksums(path).await.map(|(c, _)| c.sha256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_known_digests() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let (checksums, size) = compute_checksums(&path).await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(
            checksums.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(checksums.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn test_large_file_spans_buffers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        let data = vec![7u8; BUFFER_SIZE * 3 + 17];
        tokio::fs::write(&path, &data).await.unwrap();

        let (checksums, size) = compute_checksums(&path).await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(checksums.sha256, format!("{:x}", Sha256::digest(&data)));
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let result = compute_checksums(Path::new("/nonexistent/file.epub")).await;
        assert!(result.is_err());
    }
}
