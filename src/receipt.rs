//! Install receipts.
//!
//! Every keg carries an `INSTALL_RECEIPT.json` describing how it was produced:
//! which release and archive digest, which interpreter, which resources, the
//! resulting file set, and whether the post-install tests passed. A keg whose
//! tests failed stays installed but is recorded with `healthy: false`.

use crate::cellar::{KegFile, RECEIPT_FILE};
use crate::formula::Resource;
use crate::toolchain::ResolvedInterpreter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub installed_by: String,
    pub name: String,
    pub version: String,
    pub strategy: String,
    pub time: i64,
    pub source: SourceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<ResolvedInterpreter>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub files: Vec<KegFile>,
    /// Whether post-install tests ran
    #[serde(default)]
    pub tested: bool,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    pub sha256: String,
}

impl InstallReceipt {
    pub fn read(keg_path: &Path) -> Result<Self> {
        let receipt_path = keg_path.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&receipt_path)
            .with_context(|| format!("Failed to read receipt: {}", receipt_path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", receipt_path.display()))
    }

    pub fn write(&self, keg_path: &Path) -> Result<()> {
        let receipt_path = keg_path.join(RECEIPT_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install receipt")?;

        fs::write(&receipt_path, json)
            .with_context(|| format!("Failed to write receipt: {}", receipt_path.display()))
    }

    /// Record the outcome of the post-install tests
    pub fn mark(&mut self, verification: std::result::Result<(), String>) {
        self.tested = true;
        match verification {
            Ok(()) => {
                self.healthy = true;
                self.verification_error = None;
            }
            Err(message) => {
                self.healthy = false;
                self.verification_error = Some(message);
            }
        }
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
