//! Keg layout under the prefix and reading installed kegs.
//!
//! ```text
//! <prefix>/Cellar/termexplain/1.0.0/
//!   bin/explain              # wrapper scripts, linked into <prefix>/bin
//!   libexec/                 # isolated runtime environment
//!   INSTALL_RECEIPT.json
//! ```

use crate::config::Config;
use crate::formula::compare_versions;
use crate::receipt::InstallReceipt;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// One versioned installation directory in the Cellar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// A file inside a keg with its permission bits
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KegFile {
    pub path: String,
    pub mode: u32,
}

impl Keg {
    pub fn new(config: &Config, name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            path: config.cellar().join(name).join(version),
        }
    }

    pub fn bin(&self) -> PathBuf {
        self.path.join("bin")
    }

    pub fn libexec(&self) -> PathBuf {
        self.path.join("libexec")
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Substitute `{prefix}`, `{bin}`, `{libexec}` and `{version}`
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{prefix}", &self.path.to_string_lossy())
            .replace("{bin}", &self.bin().to_string_lossy())
            .replace("{libexec}", &self.libexec().to_string_lossy())
            .replace("{version}", &self.version)
    }

    /// Every regular file in the keg except the receipt, sorted by path
    pub fn files(&self) -> Result<Vec<KegFile>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.path).follow_links(false) {
            let entry = entry
                .with_context(|| format!("Failed to walk keg: {}", self.path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.path)
                .with_context(|| format!("Path outside keg: {}", entry.path().display()))?;
            if relative == Path::new(RECEIPT_FILE) {
                continue;
            }
            let mode = entry.metadata()?.permissions().mode() & 0o7777;
            files.push(KegFile {
                path: relative.to_string_lossy().to_string(),
                mode,
            });
        }

        files.sort();
        Ok(files)
    }

    pub fn receipt(&self) -> Option<InstallReceipt> {
        InstallReceipt::read(&self.path).ok()
    }

    /// Remove the keg directory and the formula directory if it becomes empty
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("Failed to remove keg: {}", self.path.display()))?;
        }
        if let Some(parent) = self.path.parent()
            && parent.exists()
            && fs::read_dir(parent)?.next().is_none()
        {
            fs::remove_dir(parent)?;
        }
        Ok(())
    }
}

/// All installed kegs in the Cellar
pub fn list_installed(config: &Config) -> Result<Vec<Keg>> {
    let cellar = config.cellar();

    if !cellar.exists() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(&cellar)
        .with_context(|| format!("Failed to read Cellar: {}", cellar.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        kegs.extend(installed_versions(config, &name)?);
    }

    kegs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(kegs)
}

/// Installed versions of one formula, newest first
pub fn installed_versions(config: &Config, name: &str) -> Result<Vec<Keg>> {
    let formula_dir = config.cellar().join(name);

    if !formula_dir.exists() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(&formula_dir)? {
        let entry = entry?;
        let version = entry.file_name().to_string_lossy().to_string();

        if version.starts_with('.') || !entry.path().is_dir() {
            continue;
        }

        kegs.push(Keg {
            name: name.to_string(),
            version,
            path: entry.path(),
        });
    }

    kegs.sort_by(|a, b| compare_versions(&b.version, &a.version));
    Ok(kegs)
}
