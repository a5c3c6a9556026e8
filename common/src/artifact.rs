// Artifact model: immutable descriptor of a file produced by a pipeline stage

use crate::errors::AcquireError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Fallback content type when the source does not advertise one.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Descriptor of a file produced by an acquirer or transform stage.
///
/// The producer transfers ownership of the file to the pipeline; whichever
/// stage holds the artifact may delete the file once a successor exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    /// Absolute path of the file inside the run temp directory.
    pub path: PathBuf,
    /// Logical name reported to the backup service (deterministic per job).
    pub name: String,
    /// Exact size in bytes.
    pub size: u64,
    /// Lowercase SHA-256 hex of the file contents.
    pub checksum: String,
    /// Best-effort IANA media type.
    pub mime: String,
}

impl Artifact {
    /// Stat a file and stream it once through SHA-256 to build its descriptor.
    ///
    /// A missing file is terminal (the producing stage claimed it exists);
    /// short reads surface as retryable I/O errors.
    pub async fn describe(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        mime: impl Into<String>,
    ) -> Result<Self, AcquireError> {
        let path = path.into();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AcquireError::NotFound(format!(
                "artifact file missing: {}",
                path.display()
            )));
        }

        let (size, checksum) = hash_file(&path).await?;

        Ok(Self {
            path,
            name: name.into(),
            size,
            checksum,
            mime: mime.into(),
        })
    }
}

/// Stream a file through SHA-256 with a bounded buffer.
///
/// Returns the byte count alongside the digest so callers stat and hash in a
/// single pass over the contents.
pub async fn hash_file(path: &Path) -> Result<(u64, String), AcquireError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AcquireError::Io(format!("failed to open {}: {}", path.display(), e)))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size: u64 = 0;

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_describe_computes_size_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let artifact = Artifact::describe(&path, "hello.txt", "text/plain")
            .await
            .unwrap();

        assert_eq!(artifact.size, 11);
        assert_eq!(
            artifact.checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(artifact.mime, "text/plain");
    }

    #[tokio::test]
    async fn test_describe_missing_file_is_terminal() {
        use crate::errors::Classify;

        let err = Artifact::describe("/nonexistent/nowhere.bin", "x", OCTET_STREAM)
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_hash_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        tokio::fs::write(&path, b"").await.unwrap();

        let (size, checksum) = hash_file(&path).await.unwrap();
        assert_eq!(size, 0);
        // SHA-256 of the empty string.
        assert_eq!(
            checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
