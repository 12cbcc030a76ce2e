//! Install locations and interpreter overrides.
//!
//! Values come from the environment first and can be overridden by CLI flags:
//!
//! - `KEG_PREFIX`: installation prefix (default `~/.keg`)
//! - `KEG_CACHE`: download and build cache (default `~/.cache/keg`)
//! - `KEG_PYTHON`: interpreter to use instead of searching for one

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub cache_dir: PathBuf,
    pub python: Option<PathBuf>,
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

impl Config {
    /// Build a configuration from `KEG_*` environment variables
    pub fn from_env() -> Self {
        let prefix = std::env::var_os("KEG_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".keg"));
        let cache_dir = std::env::var_os("KEG_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".cache/keg"));
        let python = std::env::var_os("KEG_PYTHON").map(PathBuf::from);

        Self {
            prefix,
            cache_dir,
            python,
        }
    }

    /// Configuration rooted entirely under `prefix`, with the cache inside it
    pub fn rooted(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            cache_dir: prefix.join("cache"),
            prefix,
            python: None,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<PathBuf>) -> Self {
        if let Some(prefix) = prefix {
            self.prefix = prefix;
        }
        self
    }

    pub fn with_python(mut self, python: Option<PathBuf>) -> Self {
        if python.is_some() {
            self.python = python;
        }
        self
    }

    pub fn cellar(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// Where versioned interpreters are looked up (`opt/python@3.11/bin`)
    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.cache_dir.join("build")
    }
}
