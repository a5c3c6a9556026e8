// Directory packing helpers shared by acquirers that capture trees
// (git worktrees, WebDAV collections, SQL Server backup sets)

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

/// Pack the contents of `src_dir` (not the directory itself) into a gzipped
/// tarball at `dst`. Synchronous; call from a blocking task.
pub fn tar_gz_dir(src_dir: &Path, dst: &Path) -> io::Result<()> {
    let out = BufWriter::new(File::create(dst)?);
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", src_dir)?;
    let encoder = builder.into_inner()?;
    encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_tar_gz_preserves_relative_paths() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"A").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"BB").unwrap();

        let out = tempfile::tempdir().unwrap();
        let archive_path = out.path().join("tree.tar.gz");
        tar_gz_dir(src.path(), &archive_path).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&archive_path).unwrap()));
        let mut seen = std::collections::HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            seen.insert(path, body);
        }

        assert_eq!(seen.get("./a.txt").map(Vec::as_slice), Some(&b"A"[..]));
        assert_eq!(seen.get("./sub/b.txt").map(Vec::as_slice), Some(&b"BB"[..]));
    }
}
