//! Formula validation.
//!
//! `keg lint` checks a formula before anyone tries to install it. Errors mark
//! formulas that must not ship (a missing or malformed digest, a resource whose
//! name and archive disagree); warnings mark legacy or suspicious choices.

use crate::download::url_basename;
use crate::formula::{Formula, InstallSpec, Release, compare_versions};
use crate::hash::Sha256Digest;
use colored::Colorize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Where the problem is, e.g. `release 1.0.1 resource click`
    pub location: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        write!(f, "{}: {}: {}", label, self.location, self.message)
    }
}

#[derive(Debug, Default)]
pub struct Report {
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    fn error(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, location, message);
    }

    fn warning(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, location, message);
    }

    fn push(&mut self, severity: Severity, location: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            location: location.into(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Lowercase and unify `-`, `_` and `.`, as package indexes do
fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

/// Whether an archive file name belongs to the named resource.
///
/// `click-8.1.7.tar.gz` belongs to `click`; `python_dotenv-1.0.0.tar.gz`
/// belongs to `python-dotenv`.
pub fn archive_matches_resource(resource: &str, url: &str) -> bool {
    let file = normalize_name(url_basename(url));
    let wanted = normalize_name(resource);
    file.strip_prefix(&wanted)
        .is_some_and(|rest| rest.starts_with('-') && rest[1..].starts_with(|c: char| c.is_ascii_digit()))
}

fn check_digest(report: &mut Report, location: &str, sha256: &str) {
    if sha256.trim().is_empty() {
        report.error(
            location,
            "sha256 is empty; integrity verification would be disabled",
        );
    } else if let Err(reason) = Sha256Digest::parse(sha256) {
        report.error(location, format!("invalid sha256: {}", reason));
    }
}

fn check_url(report: &mut Report, location: &str, url: &str) {
    if url.trim().is_empty() {
        report.error(location, "url is empty");
    } else if url.starts_with("http://") {
        report.warning(location, "url uses plain http");
    } else if url.contains("://") && !url.starts_with("https://") && !url.starts_with("file://")
    {
        report.error(location, format!("unsupported url scheme: {}", url));
    }
}

fn lint_release(report: &mut Report, formula: &Formula, release: &Release) {
    let here = format!("release {}", release.version);

    check_url(report, &here, &release.url);
    check_digest(report, &here, &release.sha256);

    if !release.url.contains(&release.version) {
        report.warning(
            &here,
            format!("url does not mention version {}", release.version),
        );
    }

    match release.interpreter() {
        Ok(None) if matches!(release.install, InstallSpec::Isolated { .. }) => {
            report.error(&here, "isolated install requires depends_on");
        }
        Err(e) => report.error(&here, e.to_string()),
        _ => {}
    }

    let mut seen = HashSet::new();
    for resource in &release.resources {
        let location = format!("{} resource {}", here, resource.name);
        if !seen.insert(normalize_name(&resource.name)) {
            report.error(&location, "duplicate resource");
        }
        check_url(report, &location, &resource.url);
        check_digest(report, &location, &resource.sha256);
        if !archive_matches_resource(&resource.name, &resource.url) {
            report.error(
                &location,
                format!(
                    "url points at {}, which is not a {} archive",
                    url_basename(&resource.url),
                    resource.name
                ),
            );
        }
    }

    match &release.install {
        InstallSpec::Direct { files, .. } => {
            report.warning(
                &here,
                "direct install exposes scripts without an isolated environment",
            );
            if files.is_empty() {
                report.error(&here, "direct install lists no files");
            }
            if !release.resources.is_empty() {
                report.warning(&here, "resources are ignored by a direct install");
            }
        }
        InstallSpec::Isolated { wrappers, .. } => {
            if wrappers.is_empty() && formula.commands.is_empty() {
                report.error(&here, "isolated install exposes no commands");
            }
        }
    }

    for replace in release.install.inreplace() {
        if replace.from.is_empty() {
            report.error(
                format!("{} inreplace {}", here, replace.path),
                "empty search string",
            );
        }
    }

    if release.tests.is_empty() {
        report.warning(&here, "no test steps");
    }
}

/// Check a formula and collect diagnostics
pub fn lint(formula: &Formula) -> Report {
    let mut report = Report::default();

    if formula.desc.as_deref().is_none_or(str::is_empty) {
        report.warning(&formula.name, "missing desc");
    }
    if formula.homepage.is_none() {
        report.warning(&formula.name, "missing homepage");
    }
    if formula.license.is_none() {
        report.warning(&formula.name, "missing license");
    }
    if let Some(head) = &formula.head
        && head.url.trim().is_empty()
    {
        report.error(format!("{} head", formula.name), "head url is empty");
    }

    for var in &formula.env {
        let mentioned = formula
            .caveats
            .as_deref()
            .is_some_and(|caveats| caveats.contains(var.as_str()));
        if !mentioned {
            report.warning(
                &formula.name,
                format!("caveats do not explain how to set {}", var),
            );
        }
    }

    let mut versions = HashSet::new();
    for release in &formula.releases {
        if !versions.insert(release.version.as_str()) {
            report.error(
                format!("release {}", release.version),
                "version declared twice",
            );
        }
        lint_release(&mut report, formula, release);
    }

    for pair in formula.releases.windows(2) {
        if compare_versions(&pair[0].version, &pair[1].version) == Ordering::Greater {
            report.warning(
                format!("release {}", pair[1].version),
                format!("listed after newer release {}", pair[0].version),
            );
        }
    }

    report
}
