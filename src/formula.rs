//! Formula files: the package descriptor and its releases.
//!
//! A formula is one TOML document describing a package. Successive revisions of
//! the package are `[[release]]` entries of the same formula rather than
//! separate files, so metadata shared across releases (description, commands,
//! caveats) is declared once.
//!
//! ```text
//! name = "termexplain"
//! commands = ["termexplain", "explain"]
//!
//! [[release]]
//! version = "1.0.0"
//! url = "https://github.com/.../v1.0.0.tar.gz"
//! sha256 = "0019df..."
//! depends_on = "python@3.8"
//! ```

use crate::error::{KegError, Result};
use crate::toolchain::Interpreter;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

/// Package descriptor parsed from a formula file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub head: Option<Head>,
    /// Commands the package exposes on PATH
    #[serde(default)]
    pub commands: Vec<String>,
    /// Environment variables the installed tool reads at runtime
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub caveats: Option<String>,
    #[serde(default, rename = "release")]
    pub releases: Vec<Release>,
}

/// Version-control head reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Head {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub url: String,
    /// Kept as a raw string so an empty declaration survives parsing and can be flagged
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub install: InstallSpec,
    #[serde(default, rename = "resource")]
    pub resources: Vec<Resource>,
    #[serde(default, rename = "test")]
    pub tests: Vec<TestStep>,
}

/// Third-party library pinned by URL and digest, installed before the package
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

/// How the unpacked archive becomes an installed keg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum InstallSpec {
    /// Private runtime environment under `libexec`, wrappers in `bin`
    Isolated {
        #[serde(default)]
        wrappers: Vec<Wrapper>,
        #[serde(default)]
        inreplace: Vec<Inreplace>,
    },
    /// Copy files from the source tree straight into `bin`
    Direct {
        #[serde(default)]
        files: Vec<FileInstall>,
        #[serde(default)]
        inreplace: Vec<Inreplace>,
    },
}

impl Default for InstallSpec {
    fn default() -> Self {
        InstallSpec::Isolated {
            wrappers: vec![],
            inreplace: vec![],
        }
    }
}

impl InstallSpec {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            InstallSpec::Isolated { .. } => "isolated",
            InstallSpec::Direct { .. } => "direct",
        }
    }

    pub fn inreplace(&self) -> &[Inreplace] {
        match self {
            InstallSpec::Isolated { inreplace, .. } | InstallSpec::Direct { inreplace, .. } => {
                inreplace
            }
        }
    }
}

/// A wrapper script exposed in `bin`.
///
/// Without `source`, a wrapper exec'ing `libexec/bin/<name>` is generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wrapper {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInstall {
    pub from: String,
    pub to: String,
}

/// Literal string replacement inside an installed file (path relative to the keg)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inreplace {
    pub path: String,
    pub from: String,
    pub to: String,
}

/// Post-install smoke test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub ignore_case: bool,
}

impl TestStep {
    /// Exit status the step requires, if any.
    ///
    /// A step with neither `status` nor `contains` must exit 0.
    pub fn expected_status(&self) -> Option<i32> {
        match (self.status, &self.contains) {
            (Some(code), _) => Some(code),
            (None, None) => Some(0),
            (None, Some(_)) => None,
        }
    }
}

impl Formula {
    /// Read and parse a formula file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KegError::Formula(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let formula: Formula = toml::from_str(contents)?;

        if formula.name.trim().is_empty() {
            return Err(KegError::Formula("formula has no name".to_string()));
        }
        if formula.releases.is_empty() {
            return Err(KegError::Formula(format!(
                "formula {} declares no releases",
                formula.name
            )));
        }

        Ok(formula)
    }

    /// Highest declared release
    pub fn latest(&self) -> Option<&Release> {
        self.releases
            .iter()
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    /// Select a release by version, or the latest when `version` is `None`
    pub fn release(&self, version: Option<&str>) -> Result<&Release> {
        let Some(wanted) = version else {
            return self
                .latest()
                .ok_or_else(|| KegError::Formula(format!("{} has no releases", self.name)));
        };
        let wanted = wanted.strip_prefix('v').unwrap_or(wanted);

        if let Some(release) = self.releases.iter().find(|r| r.version == wanted) {
            return Ok(release);
        }

        let mut msg = format!("{} has no release {}", self.name, wanted);
        if let Some(close) = self.suggest_version(wanted) {
            msg.push_str(&format!(" (did you mean {}?)", close));
        }
        Err(KegError::Formula(msg))
    }

    fn suggest_version(&self, wanted: &str) -> Option<&str> {
        self.releases
            .iter()
            .map(|r| (r.version.as_str(), strsim::jaro_winkler(wanted, &r.version)))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(v, _)| v)
    }
}

impl Release {
    /// Parsed interpreter dependency, if the release declares one
    pub fn interpreter(&self) -> Result<Option<Interpreter>> {
        self.depends_on
            .as_deref()
            .map(Interpreter::parse)
            .transpose()
            .map_err(KegError::Formula)
    }
}

/// Compare two version strings numerically, component by component
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<u32> = a.split('.').filter_map(|s| s.parse::<u32>().ok()).collect();
    let b_parts: Vec<u32> = b.split('.').filter_map(|s| s.parse::<u32>().ok()).collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).unwrap_or(&0);
        let b_part = b_parts.get(i).unwrap_or(&0);
        match a_part.cmp(b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMULA: &str = r#"
name = "termexplain"
desc = "AI-powered CLI error explainer using Gemini"
commands = ["termexplain", "explain"]
env = ["GEMINI_API_KEY"]

[head]
url = "https://github.com/smundhra-git/termExplain.git"
branch = "main"

[[release]]
version = "1.0.0"
url = "https://example.com/v1.0.0.tar.gz"
sha256 = "0019dfc4b32d63c1392aa264aed2253c1e0c2fb09216f8e2cc269bbfb8bb49b5"
depends_on = "python@3.8"

[release.install]
strategy = "direct"
files = [{ from = "main.py", to = "termexplain" }]

[[release.test]]
command = "termexplain"
args = ["--version"]

[[release]]
version = "1.0.10"
url = "https://example.com/v1.0.10.tar.gz"
sha256 = ""
depends_on = "python@3.11"

[[release.resource]]
name = "click"
url = "https://files.pythonhosted.org/packages/source/c/click/click-8.1.7.tar.gz"
sha256 = "ca9853ad459e787e2192211578cc907e7594e294c7ccc834310722b41b9ca6de"

[[release.test]]
command = "explain"
args = ["ModuleNotFoundError"]
status = 1
contains = "error"
"#;

    #[test]
    fn test_parse_formula() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        assert_eq!(formula.name, "termexplain");
        assert_eq!(formula.commands, vec!["termexplain", "explain"]);
        assert_eq!(formula.releases.len(), 2);
        assert_eq!(
            formula.head.as_ref().and_then(|h| h.branch.as_deref()),
            Some("main")
        );
    }

    #[test]
    fn test_install_strategy_defaults_to_isolated() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        let newer = formula.release(Some("1.0.10")).unwrap();
        assert_eq!(newer.install.strategy_name(), "isolated");
        assert_eq!(formula.releases[0].install.strategy_name(), "direct");
    }

    #[test]
    fn test_empty_sha_survives_parsing() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        assert!(formula.release(Some("1.0.10")).unwrap().sha256.is_empty());
    }

    #[test]
    fn test_latest_uses_numeric_order() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        assert_eq!(formula.latest().unwrap().version, "1.0.10");
    }

    #[test]
    fn test_release_accepts_tag_prefix() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        assert_eq!(formula.release(Some("v1.0.0")).unwrap().version, "1.0.0");
    }

    #[test]
    fn test_unknown_release_suggests() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        let err = formula.release(Some("1.0.1")).unwrap_err().to_string();
        assert!(err.contains("no release 1.0.1"));
        assert!(err.contains("did you mean"));
    }

    #[test]
    fn test_expected_status() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        let version_test = &formula.releases[0].tests[0];
        assert_eq!(version_test.expected_status(), Some(0));
        let error_test = &formula.releases[1].tests[0];
        assert_eq!(error_test.expected_status(), Some(1));
    }

    #[test]
    fn test_interpreter_dependency() {
        let formula = Formula::from_toml(FORMULA).unwrap();
        let interp = formula.releases[1].interpreter().unwrap().unwrap();
        assert_eq!(interp.name, "python");
        assert_eq!(interp.version, "3.11");
    }

    #[test]
    fn test_rejects_formula_without_releases() {
        let err = Formula::from_toml("name = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("no releases"));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.10", "1.0.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "10.0.0"), Ordering::Less);
    }
}
