//! Interpreter dependencies and the isolated runtime environment.
//!
//! A release declares its interpreter as `python@<major>.<minor>`. Before the
//! install plan runs, the [`Toolchain`] resolves that declaration to a concrete
//! executable; isolated installs then use it to create a private environment
//! under the keg's `libexec` and install archives into it.
//!
//! [`PythonToolchain`] drives `python -m venv` and `pip`. Tests substitute
//! their own implementation so the pipeline can run without a Python on the
//! host.

use crate::config::Config;
use crate::error::{KegError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Declared interpreter dependency, e.g. `python@3.11`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    pub name: String,
    /// `major.minor`; empty when any version is acceptable
    pub version: String,
}

impl Interpreter {
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let spec = spec.trim();
        let (name, version) = match spec.split_once('@') {
            Some((_, "")) => return Err(format!("missing version in dependency '{spec}'")),
            Some((name, version)) => (name, version),
            None => (spec, ""),
        };

        if name.is_empty() {
            return Err(format!("invalid dependency '{spec}'"));
        }
        if !version.is_empty()
            && !version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(format!("invalid version in dependency '{spec}'"));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Executable names to search for, most specific first
    pub fn executable_names(&self) -> Vec<String> {
        let base = if self.name == "python" {
            "python3".to_string()
        } else {
            self.name.clone()
        };

        if self.version.is_empty() {
            return vec![base];
        }

        let specific = match self.name.as_str() {
            "python" => format!("python{}", self.version),
            other => format!("{}{}", other, self.version),
        };
        vec![specific, base]
    }

    /// Whether a reported version (`3.11.4`) satisfies this declaration
    pub fn matches(&self, reported: &str) -> bool {
        if self.version.is_empty() {
            return true;
        }
        reported == self.version
            || reported
                .strip_prefix(&self.version)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl std::fmt::Display for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}

/// An interpreter found on this system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInterpreter {
    pub spec: String,
    pub path: PathBuf,
    pub version: String,
}

/// Builds and populates isolated runtime environments
pub trait Toolchain {
    /// Locate an interpreter satisfying `interpreter`
    fn resolve(&mut self, interpreter: &Interpreter) -> Result<ResolvedInterpreter>;

    /// Create an empty environment at `env_dir`
    fn create_env(&self, env_dir: &Path) -> Result<()>;

    /// Install an archive or source directory into the environment
    fn install_into(&self, env_dir: &Path, source: &Path) -> Result<()>;
}

/// `venv` + `pip` backed toolchain
pub struct PythonToolchain {
    override_path: Option<PathBuf>,
    opt_dir: PathBuf,
    resolved: Option<ResolvedInterpreter>,
}

impl PythonToolchain {
    pub fn new(config: &Config) -> Self {
        Self {
            override_path: config.python.clone(),
            opt_dir: config.opt_dir(),
            resolved: None,
        }
    }

    fn candidates(&self, interpreter: &Interpreter) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(path) = &self.override_path {
            candidates.push(path.clone());
        }

        let names = interpreter.executable_names();
        let keg_bin = self.opt_dir.join(interpreter.to_string()).join("bin");
        candidates.extend(names.iter().map(|name| keg_bin.join(name)));

        for name in &names {
            if let Some(found) = find_on_path(name) {
                candidates.push(found);
            }
        }

        candidates
    }

    fn interpreter(&self) -> Result<&ResolvedInterpreter> {
        self.resolved.as_ref().ok_or_else(|| {
            KegError::Dependency("no interpreter resolved for this install".to_string())
        })
    }
}

impl Toolchain for PythonToolchain {
    fn resolve(&mut self, interpreter: &Interpreter) -> Result<ResolvedInterpreter> {
        for candidate in self.candidates(interpreter) {
            if !candidate.is_file() {
                continue;
            }
            let Some(version) = python_version(&candidate) else {
                debug!("{} did not report a version", candidate.display());
                continue;
            };
            if interpreter.matches(&version) {
                debug!("resolved {} to {}", interpreter, candidate.display());
                let resolved = ResolvedInterpreter {
                    spec: interpreter.to_string(),
                    path: candidate,
                    version,
                };
                self.resolved = Some(resolved.clone());
                return Ok(resolved);
            }
            debug!(
                "{} is {}, wanted {}",
                candidate.display(),
                version,
                interpreter
            );
        }

        Err(KegError::Dependency(format!(
            "{} is required but was not found (set KEG_PYTHON or install {})",
            interpreter, interpreter
        )))
    }

    fn create_env(&self, env_dir: &Path) -> Result<()> {
        let python = self.interpreter()?;
        run(
            Command::new(&python.path).arg("-m").arg("venv").arg(env_dir),
            "create virtual environment",
        )
    }

    fn install_into(&self, env_dir: &Path, source: &Path) -> Result<()> {
        run(
            Command::new(env_dir.join("bin").join("python"))
                .args(["-m", "pip", "install"])
                .args(["--no-deps", "--no-input", "--disable-pip-version-check"])
                .arg(source),
            &format!("pip install {}", source.display()),
        )
    }
}

fn run(command: &mut Command, what: &str) -> Result<()> {
    debug!("running {:?}", command);
    let output = command
        .output()
        .map_err(|e| KegError::Install(format!("failed to {}: {}", what, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KegError::Install(format!(
            "failed to {} ({}): {}",
            what,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Ask an interpreter for its version (`Python 3.11.4` → `3.11.4`)
fn python_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("--version").output().ok()?;
    // Old interpreters print the version on stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).to_string()
    };
    text.split_whitespace().nth(1).map(|v| v.to_string())
}

/// Find an executable by name on `PATH`
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
