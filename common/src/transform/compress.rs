// Compression stage: wrap the artifact in a single-entry deflate container

use crate::artifact::Artifact;
use crate::errors::TransformError;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Inputs that are already compressed pass through untouched.
const SKIP_SUFFIXES: [&str; 5] = [".zip", ".gz", ".bz2", ".rar", ".7z"];

/// True when compressing would only waste cycles on an already-packed input.
pub fn is_compressed(name: &str) -> bool {
    let lower = name.to_lowercase();
    SKIP_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Compress the artifact into `<path>.zip` holding the input file under its
/// basename. Level 1..=9 selects the deflate level; 0 keeps the library
/// default. Already-compressed inputs are returned unchanged.
#[instrument(skip(artifact), fields(name = %artifact.name, size = artifact.size))]
pub async fn compress(artifact: Artifact, level: u32) -> Result<Artifact, TransformError> {
    if is_compressed(&artifact.name) {
        info!("Input already compressed, skipping");
        return Ok(artifact);
    }

    let out_path = PathBuf::from(format!("{}.zip", artifact.path.display()));
    let entry_name = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| artifact.name.clone());

    let src = artifact.path.clone();
    let dst = out_path.clone();
    tokio::task::spawn_blocking(move || write_zip(&src, &dst, &entry_name, level))
        .await
        .map_err(|e| TransformError::Io(format!("compression task failed: {}", e)))??;

    let out_name = format!("{}.zip", artifact.name);
    let compressed = Artifact::describe(&out_path, out_name, "application/zip")
        .await
        .map_err(|e| TransformError::Io(e.to_string()))?;

    info!(
        out = %compressed.path.display(),
        out_size = compressed.size,
        "Compression complete"
    );
    Ok(compressed)
}

fn write_zip(src: &Path, dst: &Path, entry_name: &str, level: u32) -> Result<(), TransformError> {
    let mut reader = BufReader::new(File::open(src)?);
    let out = BufWriter::new(File::create(dst)?);
    let mut zip = ZipWriter::new(out);

    let mut options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    if (1..=9).contains(&level) {
        options = options.compression_level(Some(level as i64));
    }

    zip.start_file(entry_name, options)
        .map_err(|e| TransformError::Io(format!("failed to open zip entry: {}", e)))?;
    io::copy(&mut reader, &mut zip)?;
    zip.finish()
        .map_err(|e| TransformError::Io(format!("failed to finish zip: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    async fn artifact_from(dir: &tempfile::TempDir, name: &str, body: &[u8]) -> Artifact {
        let path = dir.path().join(name);
        tokio::fs::write(&path, body).await.unwrap();
        Artifact::describe(&path, name, "application/octet-stream")
            .await
            .unwrap()
    }

    #[test]
    fn test_skip_suffixes() {
        assert!(is_compressed("dump.zip"));
        assert!(is_compressed("dump.tar.gz"));
        assert!(is_compressed("DUMP.7Z"));
        assert!(!is_compressed("dump.sql"));
        assert!(!is_compressed("dump.tar"));
    }

    #[tokio::test]
    async fn test_compressed_input_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let input = artifact_from(&dir, "j1.tar.gz", b"\x1f\x8bfake").await;
        let expected = input.clone();

        let out = compress(input, 6).await.unwrap();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_compress_produces_readable_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let input = artifact_from(&dir, "j1.sql", b"SELECT 1;\n").await;
        let input_path = input.path.clone();

        let out = compress(input, 6).await.unwrap();
        assert_eq!(out.path, dir.path().join("j1.sql.zip"));
        assert_eq!(out.name, "j1.sql.zip");
        assert_eq!(out.mime, "application/zip");
        // Input file still present; deletion belongs to the orchestrator.
        assert!(input_path.exists());

        let mut archive = zip::ZipArchive::new(File::open(&out.path).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "j1.sql");
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "SELECT 1;\n");
    }

    #[tokio::test]
    async fn test_metadata_is_recomputed_from_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = artifact_from(&dir, "j1.bin", &[0u8; 4096]).await;
        let input_checksum = input.checksum.clone();

        let out = compress(input, 9).await.unwrap();
        assert_ne!(out.checksum, input_checksum);
        assert_eq!(out.size, std::fs::metadata(&out.path).unwrap().len());
    }
}
