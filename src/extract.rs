//! Unpacking source archives into a build directory.
//!
//! Release archives (GitHub tag tarballs, sdists) wrap their contents in a
//! single top-level directory such as `termExplain-1.0.0/`. After unpacking,
//! that directory is returned as the source root so install steps can refer
//! to `explain.sh` rather than `termExplain-1.0.0/explain.sh`.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;

/// Unpack a `.tar.gz` archive into `dest` and return the source root
pub fn unpack_source(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to clear build directory: {}", dest.display()))?;
    }
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create build directory: {}", dest.display()))?;

    let file = fs::File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to extract archive to: {}", dest.display()))?;

    source_root(dest)
}

/// The single top-level directory of an unpacked tree, or the tree itself
fn source_root(dest: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(dest)
        .with_context(|| format!("Failed to read build directory: {}", dest.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .collect();

    match entries.as_slice() {
        [only] if only.path().is_dir() => Ok(only.path()),
        [] => anyhow::bail!("Archive is empty: {}", dest.display()),
        _ => Ok(dest.to_path_buf()),
    }
}
