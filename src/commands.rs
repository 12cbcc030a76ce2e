//! CLI command implementations

use crate::cellar::{self, Keg};
use crate::config::Config;
use crate::download;
use crate::error::{KegError, Result};
use crate::formula::{Formula, InstallSpec};
use crate::install::{self, Installer};
use crate::lint::{self, Severity};
use crate::resource;
use crate::symlink;
use crate::toolchain::PythonToolchain;
use crate::ui;
use colored::Colorize;
use std::path::Path;

/// Lint a formula; returns whether it is free of errors
pub fn lint(path: &Path) -> Result<bool> {
    let formula = Formula::load(path)?;
    let report = lint::lint(&formula);

    for diagnostic in &report.diagnostics {
        println!("{}", diagnostic);
    }

    let errors = report.errors().count();
    let warnings = report
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .count();

    if report.diagnostics.is_empty() {
        ui::success(&format!("{} is clean", formula.name.bold()));
    } else {
        println!(
            "{}: {} error(s), {} warning(s)",
            formula.name.bold(),
            errors,
            warnings
        );
    }

    Ok(!report.has_errors())
}

pub fn info(path: &Path) -> Result<()> {
    let formula = Formula::load(path)?;

    println!("{}", format!("==> {}", formula.name).bold().green());
    if let Some(desc) = &formula.desc {
        println!("{}", desc);
    }
    if let Some(homepage) = &formula.homepage {
        println!("{}", homepage.cyan());
    }
    if let Some(license) = &formula.license {
        println!("{}: {}", "License".dimmed(), license);
    }
    if let Some(head) = &formula.head {
        println!(
            "{}: {} ({})",
            "Head".dimmed(),
            head.url,
            head.branch.as_deref().unwrap_or("default branch")
        );
    }
    if !formula.commands.is_empty() {
        println!("{}: {}", "Commands".dimmed(), formula.commands.join(", "));
    }
    if !formula.env.is_empty() {
        println!("{}: {}", "Requires".dimmed(), formula.env.join(", "));
    }

    let latest = formula.latest().map(|r| r.version.clone());
    println!();
    println!("{}", "Releases:".bold());
    for release in &formula.releases {
        let marker = if Some(&release.version) == latest.as_ref() {
            " (latest)".green().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}{}  {}  {}  {} resource(s), {} test(s)",
            release.version.cyan(),
            marker,
            release.depends_on.as_deref().unwrap_or("-"),
            release.install.strategy_name(),
            release.resources.len(),
            release.tests.len()
        );
    }

    Ok(())
}

pub fn caveats(path: &Path) -> Result<()> {
    let formula = Formula::load(path)?;
    print_caveats(&formula);
    Ok(())
}

fn print_caveats(formula: &Formula) {
    if let Some(caveats) = &formula.caveats {
        println!();
        println!("{}", "==> Caveats".bold().yellow());
        println!("{}", caveats.trim_end());
    }
}

pub async fn fetch(config: &Config, path: &Path, version: Option<&str>) -> Result<()> {
    let formula = Formula::load(path)?;
    let release = formula.release(version)?;

    let installer = Installer::new(config, PythonToolchain::new(config))?;
    let fetched = installer.fetch(&formula, release).await?;

    ui::success(&format!("Fetched {}", fetched.archive.display()));
    for (resource, archive) in &fetched.resources {
        ui::detail(&format!("{}: {}", resource.name, archive.display()));
    }
    Ok(())
}

pub async fn install(
    config: &Config,
    path: &Path,
    version: Option<&str>,
    skip_tests: bool,
) -> Result<()> {
    let formula = Formula::load(path)?;
    let release = formula.release(version)?;

    if let InstallSpec::Direct { .. } = release.install {
        ui::warning(&format!(
            "{} {} uses a direct install (no isolated environment)",
            formula.name, release.version
        ));
    }

    let mut installer =
        Installer::new(config, PythonToolchain::new(config))?.skip_tests(skip_tests);
    let outcome = installer.install(&formula, release).await;

    match outcome {
        Ok(outcome) => {
            ui::success(&format!(
                "{} {} is ready in {}",
                formula.name.bold(),
                release.version,
                outcome.keg.path.display()
            ));
            print_caveats(&formula);
            Ok(())
        }
        Err(KegError::Verification(message)) => {
            ui::failure(&format!(
                "{} {} installed but failed its tests; marked unhealthy",
                formula.name, release.version
            ));
            Err(KegError::Verification(message))
        }
        Err(e) => Err(e),
    }
}

fn find_keg(config: &Config, name: &str, version: Option<&str>) -> Result<Keg> {
    let versions = cellar::installed_versions(config, name)?;
    let keg = match version {
        Some(version) => versions.into_iter().find(|k| k.version == version),
        None => versions.into_iter().next(),
    };
    keg.ok_or_else(|| {
        KegError::Formula(format!(
            "{}{} is not installed",
            name,
            version.map(|v| format!(" {}", v)).unwrap_or_default()
        ))
    })
}

/// Re-run the tests of an installed release
pub fn test(config: &Config, path: &Path, version: Option<&str>) -> Result<()> {
    let formula = Formula::load(path)?;
    let keg = find_keg(config, &formula.name, version)?;
    let release = formula.release(Some(&keg.version))?;

    if release.tests.is_empty() {
        ui::warning(&format!("{} {} has no tests", formula.name, keg.version));
        return Ok(());
    }

    let mut receipt = keg.receipt().ok_or_else(|| {
        KegError::Install(format!("{} has no install receipt", keg.path.display()))
    })?;
    install::test_keg(&keg, release, &mut receipt)
}

pub fn uninstall(config: &Config, name: &str, version: Option<&str>) -> Result<()> {
    let keg = find_keg(config, name, version)?;

    let unlinked = symlink::unlink_keg(config, &keg)?;
    keg.remove()?;

    ui::success(&format!(
        "Uninstalled {} {} ({} unlinked)",
        name.bold(),
        keg.version,
        unlinked.len()
    ));
    Ok(())
}

pub fn list(config: &Config) -> Result<()> {
    let kegs = cellar::list_installed(config)?;

    if kegs.is_empty() {
        println!("No kegs installed in {}", config.prefix.display());
        return Ok(());
    }

    for keg in kegs {
        let status = match keg.receipt() {
            Some(r) if !r.tested => "untested".dimmed().to_string(),
            Some(r) if r.healthy => "healthy".green().to_string(),
            Some(_) => "unhealthy".red().to_string(),
            None => "no receipt".yellow().to_string(),
        };
        println!("{} {}  {}", keg.name.bold(), keg.version.cyan(), status);
    }
    Ok(())
}

/// Print resource stanzas for archive URLs
pub async fn hash(config: &Config, urls: &[String], name: Option<&str>) -> Result<()> {
    if name.is_some() && urls.len() > 1 {
        return Err(KegError::Formula(
            "--name can only be used with a single url".to_string(),
        ));
    }

    let client = download::client()?;
    for url in urls {
        let pinned = resource::pin_url(config, &client, name, url).await?;
        println!("{}", resource::stanza(&pinned));
    }
    Ok(())
}

/// Print resource stanzas for `name==version` PyPI requirements
pub async fn pypi(config: &Config, specs: &[String]) -> Result<()> {
    let client = download::client()?;
    let mut failed = 0;

    for spec in specs {
        match resource::pin_pypi(config, &client, spec).await {
            Ok(pinned) => println!("{}", resource::stanza(&pinned)),
            Err(e) => {
                ui::failure(&format!("could not pin {}: {}", spec, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(KegError::Formula(format!(
            "{} of {} requirement(s) could not be pinned",
            failed,
            specs.len()
        )));
    }
    Ok(())
}
