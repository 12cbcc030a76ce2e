//! Linking keg commands into `<prefix>/bin`

use crate::cellar::Keg;
use crate::config::Config;
use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Create relative symlinks in `<prefix>/bin` for every entry in the keg's `bin`
pub fn link_keg(config: &Config, keg: &Keg) -> Result<Vec<PathBuf>> {
    let source_dir = keg.bin();
    let target_dir = config.bin_dir();
    let mut linked = Vec::new();

    if !source_dir.is_dir() {
        return Ok(linked);
    }

    fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create directory: {}", target_dir.display()))?;

    let formula_dir = config.cellar().join(&keg.name);
    let mut entries: Vec<_> = fs::read_dir(&source_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    entries.sort();

    for file_name in entries {
        let target = target_dir.join(&file_name);
        let relative = PathBuf::from("../Cellar")
            .join(&keg.name)
            .join(&keg.version)
            .join("bin")
            .join(&file_name);

        if target.symlink_metadata().is_ok() {
            match resolve_link(&target) {
                // Replace links into any version of the same formula
                Some(existing) if existing.starts_with(&formula_dir) => {
                    fs::remove_file(&target).with_context(|| {
                        format!("Failed to replace symlink: {}", target.display())
                    })?;
                }
                _ => {
                    warn!(
                        "{} exists and is not owned by {}; not linking",
                        target.display(),
                        keg.name
                    );
                    continue;
                }
            }
        }

        unix_fs::symlink(&relative, &target).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                target.display(),
                relative.display()
            )
        })?;
        linked.push(target);
    }

    Ok(linked)
}

/// Remove symlinks in `<prefix>/bin` that point into this keg
pub fn unlink_keg(config: &Config, keg: &Keg) -> Result<Vec<PathBuf>> {
    let target_dir = config.bin_dir();
    let mut unlinked = Vec::new();

    if !target_dir.is_dir() {
        return Ok(unlinked);
    }

    for entry in fs::read_dir(&target_dir)? {
        let path = entry?.path();
        if let Some(resolved) = resolve_link(&path)
            && resolved.starts_with(&keg.path)
        {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove symlink: {}", path.display()))?;
            unlinked.push(path);
        }
    }

    Ok(unlinked)
}

/// Resolve a symlink's target lexically, without touching the filesystem further
fn resolve_link(link: &Path) -> Option<PathBuf> {
    let target = fs::read_link(link).ok()?;
    let resolved = if target.is_relative() {
        link.parent()?.join(target)
    } else {
        target
    };
    Some(normalize_path(&resolved))
}

/// Collapse `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
