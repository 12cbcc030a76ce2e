//! The install pipeline: fetch → verify → resolve → install → test.
//!
//! A release is turned into an [`InstallPlan`], an ordered list of [`Step`]s,
//! which is then executed against a fresh keg. The whole pipeline is
//! sequential and all-or-nothing up to the test stage: if fetching, verifying,
//! resolving or any install step fails, the new keg and its links are removed,
//! a previously installed keg of the same version is restored and relinked,
//! and the error is returned unchanged. A failing test leaves the installed
//! keg in place, records it as unhealthy in its receipt, and returns a
//! verification error.
//!
//! Only downloads are awaited. Install steps and tests run `venv`, `pip` and
//! the installed commands synchronously on the calling task; an install is
//! the only work on the runtime while it runs, so nothing else is starved.
//!
//! # Strategies
//!
//! - **Isolated** (default): create a private environment under `libexec`,
//!   install every pinned resource into it, then the package itself, and
//!   expose wrapper scripts in `bin` that point into `libexec`.
//! - **Direct** (legacy): copy files from the source tree into `bin` and mark
//!   them executable.

use crate::cellar::Keg;
use crate::config::Config;
use crate::download;
use crate::error::{KegError, Result};
use crate::extract;
use crate::formula::{Formula, InstallSpec, Inreplace, Release, Resource};
use crate::receipt::{self, InstallReceipt, SourceInfo};
use crate::symlink;
use crate::toolchain::{ResolvedInterpreter, Toolchain};
use crate::ui;
use crate::verify;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const EXECUTABLE_MODE: u32 = 0o755;

/// One install action, executed in plan order
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    CreateEnv,
    InstallResource { name: String, archive: PathBuf },
    InstallPackage,
    /// Write `bin/<name>` exec'ing `libexec/bin/<name>`
    GenerateWrapper { name: String },
    /// Copy a script from the source tree to `bin/<name>`
    CopyWrapper { name: String, source: String },
    /// Copy a file from the source tree to `bin/<to>`
    InstallFile { from: String, to: String },
    /// Mark a keg-relative path executable
    Chmod { path: String },
    Inreplace(Inreplace),
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::CreateEnv => write!(f, "create isolated environment"),
            Step::InstallResource { name, .. } => write!(f, "install resource {}", name),
            Step::InstallPackage => write!(f, "install package"),
            Step::GenerateWrapper { name } => write!(f, "write wrapper bin/{}", name),
            Step::CopyWrapper { name, source } => write!(f, "install {} as bin/{}", source, name),
            Step::InstallFile { from, to } => write!(f, "install {} as bin/{}", from, to),
            Step::Chmod { path } => write!(f, "chmod {:o} {}", EXECUTABLE_MODE, path),
            Step::Inreplace(r) => write!(f, "inreplace {}", r.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallPlan {
    pub steps: Vec<Step>,
}

impl InstallPlan {
    /// Build the ordered step list for a release.
    ///
    /// `resources` pairs each declared resource with its verified archive.
    pub fn new(formula: &Formula, release: &Release, resources: &[(Resource, PathBuf)]) -> Self {
        let mut steps = Vec::new();

        match &release.install {
            InstallSpec::Isolated { wrappers, .. } => {
                steps.push(Step::CreateEnv);
                steps.extend(resources.iter().map(|(resource, archive)| {
                    Step::InstallResource {
                        name: resource.name.clone(),
                        archive: archive.clone(),
                    }
                }));
                steps.push(Step::InstallPackage);

                let mut exposed = Vec::new();
                if wrappers.is_empty() {
                    for command in &formula.commands {
                        steps.push(Step::GenerateWrapper {
                            name: command.clone(),
                        });
                        exposed.push(command.clone());
                    }
                } else {
                    for wrapper in wrappers {
                        steps.push(match &wrapper.source {
                            Some(source) => Step::CopyWrapper {
                                name: wrapper.name.clone(),
                                source: source.clone(),
                            },
                            None => Step::GenerateWrapper {
                                name: wrapper.name.clone(),
                            },
                        });
                        exposed.push(wrapper.name.clone());
                    }
                }
                steps.extend(exposed.into_iter().map(|name| Step::Chmod {
                    path: format!("bin/{}", name),
                }));
            }
            InstallSpec::Direct { files, .. } => {
                for file in files {
                    steps.push(Step::InstallFile {
                        from: file.from.clone(),
                        to: file.to.clone(),
                    });
                }
                steps.extend(files.iter().map(|file| Step::Chmod {
                    path: format!("bin/{}", file.to),
                }));
            }
        }

        steps.extend(release.install.inreplace().iter().cloned().map(Step::Inreplace));

        Self { steps }
    }

    pub fn is_isolated(&self) -> bool {
        self.steps.first() == Some(&Step::CreateEnv)
    }
}

/// What a step needs from its surroundings
pub struct StepContext<'a> {
    pub keg: &'a Keg,
    pub source_root: &'a Path,
    pub toolchain: &'a dyn Toolchain,
}

fn install_error(step: &Step, err: impl std::fmt::Display) -> KegError {
    KegError::Install(format!("{}: {}", step, err))
}

/// Copy a file from the source tree, refusing paths that escape it
fn copy_from_source(step: &Step, source_root: &Path, from: &str, dest: &Path) -> Result<()> {
    if Path::new(from).is_absolute() || from.split('/').any(|part| part == "..") {
        return Err(install_error(step, "path must stay inside the source tree"));
    }
    let source = source_root.join(from);
    if !source.is_file() {
        return Err(install_error(
            step,
            format!("{} not found in source tree", from),
        ));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| install_error(step, e))?;
    }
    fs::copy(&source, dest).map_err(|e| install_error(step, e))?;
    Ok(())
}

pub fn wrapper_script(keg: &Keg, name: &str) -> String {
    format!(
        "#!/bin/sh\nexec \"{}\" \"$@\"\n",
        keg.libexec().join("bin").join(name).display()
    )
}

/// Execute one step
pub fn run_step(step: &Step, ctx: &StepContext<'_>) -> Result<()> {
    debug!("step: {}", step);
    let keg = ctx.keg;

    match step {
        Step::CreateEnv => ctx
            .toolchain
            .create_env(&keg.libexec())
            .map_err(|e| install_error(step, e)),
        Step::InstallResource { archive, .. } => ctx
            .toolchain
            .install_into(&keg.libexec(), archive)
            .map_err(|e| install_error(step, e)),
        Step::InstallPackage => ctx
            .toolchain
            .install_into(&keg.libexec(), ctx.source_root)
            .map_err(|e| install_error(step, e)),
        Step::GenerateWrapper { name } => {
            let entry = keg.libexec().join("bin").join(name);
            if !entry.exists() {
                return Err(install_error(
                    step,
                    format!("{} was not installed into the environment", entry.display()),
                ));
            }
            fs::create_dir_all(keg.bin()).map_err(|e| install_error(step, e))?;
            fs::write(keg.bin().join(name), wrapper_script(keg, name))
                .map_err(|e| install_error(step, e))
        }
        Step::CopyWrapper { name, source } => {
            copy_from_source(step, ctx.source_root, source, &keg.bin().join(name))
        }
        Step::InstallFile { from, to } => {
            copy_from_source(step, ctx.source_root, from, &keg.bin().join(to))
        }
        Step::Chmod { path } => {
            let target = keg.path.join(path);
            fs::set_permissions(&target, fs::Permissions::from_mode(EXECUTABLE_MODE))
                .map_err(|e| install_error(step, format!("{}: {}", target.display(), e)))
        }
        Step::Inreplace(replace) => {
            let target = keg.path.join(&replace.path);
            let contents = fs::read_to_string(&target)
                .map_err(|e| install_error(step, format!("{}: {}", target.display(), e)))?;
            if !contents.contains(&replace.from) {
                return Err(install_error(
                    step,
                    format!("{:?} not found in {}", replace.from, replace.path),
                ));
            }
            let patched = contents.replace(&replace.from, &keg.expand(&replace.to));
            fs::write(&target, patched).map_err(|e| install_error(step, e))
        }
    }
}

/// Check that wrappers point into the keg, never at the unpacked source tree.
///
/// For isolated installs each wrapper must also reference `libexec`.
pub fn check_wrappers(keg: &Keg, source_root: &Path, isolated: bool) -> Result<()> {
    let bin = keg.bin();
    if !bin.is_dir() {
        return Ok(());
    }

    let source = source_root.to_string_lossy();
    let libexec = keg.libexec();
    let libexec = libexec.to_string_lossy();

    for entry in fs::read_dir(&bin)? {
        let path = entry?.path();
        // Binary entry points are not wrappers
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        let name = path.file_name().unwrap_or_default().to_string_lossy();

        if contents.contains(source.as_ref()) {
            return Err(KegError::Install(format!(
                "bin/{} references the build directory {}",
                name, source
            )));
        }
        if isolated && !contents.contains(libexec.as_ref()) {
            return Err(KegError::Install(format!(
                "bin/{} does not reference the isolated environment {}",
                name, libexec
            )));
        }
    }

    Ok(())
}

/// Removes a directory on drop
struct Cleanup {
    path: PathBuf,
}

impl Cleanup {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if self.path.exists() {
            debug!("removing {}", self.path.display());
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Puts the prefix back the way it was unless committed.
///
/// An installed keg of the same version is unlinked and moved aside to
/// `.<version>.previous` for the duration of the install. On drop without
/// commit the new keg is unlinked and removed, and the previous one is
/// restored and relinked.
struct Rollback<'a> {
    config: &'a Config,
    keg: Keg,
    previous: Option<PathBuf>,
    committed: bool,
}

impl<'a> Rollback<'a> {
    fn begin(config: &'a Config, keg: &Keg) -> Result<Self> {
        let mut previous = None;

        if keg.exists() {
            info!("replacing existing keg {}", keg.path.display());
            symlink::unlink_keg(config, keg)?;
            let aside = keg.path.with_file_name(format!(".{}.previous", keg.version));
            if aside.exists() {
                fs::remove_dir_all(&aside)?;
            }
            fs::rename(&keg.path, &aside)?;
            previous = Some(aside);
        }

        Ok(Self {
            config,
            keg: keg.clone(),
            previous,
            committed: false,
        })
    }

    fn commit(&mut self) {
        self.committed = true;
        if let Some(previous) = self.previous.take()
            && let Err(e) = fs::remove_dir_all(&previous)
        {
            warn!("failed to remove {}: {}", previous.display(), e);
        }
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        if let Err(e) = symlink::unlink_keg(self.config, &self.keg) {
            warn!("failed to unlink {}: {:#}", self.keg.path.display(), e);
        }

        match self.previous.take() {
            Some(previous) => {
                if self.keg.path.exists() {
                    let _ = fs::remove_dir_all(&self.keg.path);
                }
                debug!("restoring {}", self.keg.path.display());
                if let Err(e) = fs::rename(&previous, &self.keg.path) {
                    warn!("failed to restore {}: {}", self.keg.path.display(), e);
                    return;
                }
                if let Err(e) = symlink::link_keg(self.config, &self.keg) {
                    warn!("failed to relink {}: {:#}", self.keg.path.display(), e);
                }
            }
            None => {
                debug!("removing {}", self.keg.path.display());
                if let Err(e) = self.keg.remove() {
                    warn!("failed to remove {}: {:#}", self.keg.path.display(), e);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub keg: Keg,
    pub receipt: InstallReceipt,
    pub linked: Vec<PathBuf>,
}

pub struct Installer<'a, T: Toolchain> {
    config: &'a Config,
    toolchain: T,
    client: reqwest::Client,
    run_tests: bool,
}

impl<'a, T: Toolchain> Installer<'a, T> {
    pub fn new(config: &'a Config, toolchain: T) -> Result<Self> {
        Ok(Self {
            config,
            toolchain,
            client: download::client()?,
            run_tests: true,
        })
    }

    pub fn skip_tests(mut self, skip: bool) -> Self {
        self.run_tests = !skip;
        self
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Download and verify the archive and every resource of a release
    pub async fn fetch(&self, formula: &Formula, release: &Release) -> Result<Fetched> {
        ui::step(&format!("Fetching {} {}", formula.name, release.version));
        let archive = download::fetch_verified(
            self.config,
            &self.client,
            &formula.name,
            &release.url,
            &release.sha256,
        )
        .await?;
        ui::detail(&format!("verified {}", download::url_basename(&release.url)));

        let mut resources = Vec::new();
        for resource in &release.resources {
            let path = download::fetch_verified(
                self.config,
                &self.client,
                &resource.name,
                &resource.url,
                &resource.sha256,
            )
            .await?;
            ui::detail(&format!("verified resource {}", resource.name));
            resources.push((resource.clone(), path));
        }

        Ok(Fetched { archive, resources })
    }

    /// Resolve the release's interpreter dependency
    pub fn resolve(&mut self, release: &Release) -> Result<Option<ResolvedInterpreter>> {
        let interpreter = release.interpreter()?;
        match (interpreter, &release.install) {
            (Some(interpreter), _) => {
                ui::step(&format!("Resolving {}", interpreter));
                let resolved = self.toolchain.resolve(&interpreter)?;
                ui::detail(&format!(
                    "using {} ({})",
                    resolved.path.display(),
                    resolved.version
                ));
                Ok(Some(resolved))
            }
            (None, InstallSpec::Isolated { .. }) => Err(KegError::Dependency(format!(
                "release {} uses an isolated install but declares no interpreter",
                release.version
            ))),
            (None, InstallSpec::Direct { .. }) => Ok(None),
        }
    }

    /// Run the full pipeline for one release
    pub async fn install(&mut self, formula: &Formula, release: &Release) -> Result<InstallOutcome> {
        let fetched = self.fetch(formula, release).await?;
        let interpreter = self.resolve(release)?;

        ui::step(&format!("Installing {} {}", formula.name, release.version));
        let keg = Keg::new(self.config, &formula.name, &release.version);

        let build_dir = self
            .config
            .build_dir()
            .join(format!("{}-{}", formula.name, release.version));
        let _build_cleanup = Cleanup::new(build_dir.clone());
        let source_root = extract::unpack_source(&fetched.archive, &build_dir)
            .map_err(|e| KegError::Install(format!("{:#}", e)))?;

        let mut rollback = Rollback::begin(self.config, &keg)?;
        fs::create_dir_all(&keg.path)?;

        let plan = InstallPlan::new(formula, release, &fetched.resources);
        let ctx = StepContext {
            keg: &keg,
            source_root: &source_root,
            toolchain: &self.toolchain,
        };
        for step in &plan.steps {
            run_step(step, &ctx)?;
            ui::detail(&step.to_string());
        }
        check_wrappers(&keg, &build_dir, plan.is_isolated())?;

        let mut receipt = InstallReceipt {
            installed_by: format!("keg/{}", env!("CARGO_PKG_VERSION")),
            name: formula.name.clone(),
            version: release.version.clone(),
            strategy: release.install.strategy_name().to_string(),
            time: receipt::now(),
            source: SourceInfo {
                url: release.url.clone(),
                sha256: release.sha256.to_ascii_lowercase(),
            },
            interpreter,
            resources: release.resources.clone(),
            files: keg.files()?,
            tested: false,
            healthy: true,
            verification_error: None,
        };
        receipt.write(&keg.path)?;

        let linked = symlink::link_keg(self.config, &keg)
            .map_err(|e| KegError::Install(format!("{:#}", e)))?;
        rollback.commit();
        ui::success(&format!(
            "Installed {} {} ({} linked)",
            formula.name,
            release.version,
            linked.len()
        ));

        if self.run_tests && !release.tests.is_empty() {
            test_keg(&keg, release, &mut receipt)?;
        }

        Ok(InstallOutcome {
            keg,
            receipt,
            linked,
        })
    }
}

/// Verified downloads for one release
#[derive(Debug)]
pub struct Fetched {
    pub archive: PathBuf,
    pub resources: Vec<(Resource, PathBuf)>,
}

/// Run a release's tests against an installed keg and record the outcome
pub fn test_keg(keg: &Keg, release: &Release, receipt: &mut InstallReceipt) -> Result<()> {
    ui::step(&format!("Testing {} {}", keg.name, keg.version));
    let outcome = verify::run_tests(keg, &release.tests);
    receipt.mark(outcome.clone().map(|_| ()));
    receipt.write(&keg.path)?;

    match outcome {
        Ok(passed) => {
            ui::success(&format!("{} test(s) passed", passed));
            Ok(())
        }
        Err(message) => Err(KegError::Verification(message)),
    }
}
