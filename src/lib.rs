//! Library interface for keg.
//!
//! keg installs packages described by TOML formula files. A formula lists the
//! releases of one package; installing a release runs a fixed, sequential
//! pipeline:
//!
//! 1. **fetch** the source archive and every pinned resource
//! 2. **verify** each download against its declared SHA-256
//! 3. **resolve** the declared interpreter (`python@3.11`)
//! 4. **install** into `<prefix>/Cellar/<name>/<version>`, either into an
//!    isolated environment with wrapper scripts (default) or by copying files
//!    directly into `bin`
//! 5. **test** the installed commands
//!
//! # Examples
//!
//! ```no_run
//! use keg::config::Config;
//! use keg::formula::Formula;
//! use keg::install::Installer;
//! use keg::toolchain::PythonToolchain;
//!
//! #[tokio::main]
//! async fn main() -> keg::Result<()> {
//!     let config = Config::from_env();
//!     let formula = Formula::load(std::path::Path::new("formula/termexplain.toml"))?;
//!     let release = formula.release(None)?;
//!
//!     let mut installer = Installer::new(&config, PythonToolchain::new(&config))?;
//!     let outcome = installer.install(&formula, release).await?;
//!     println!("installed into {}", outcome.keg.path.display());
//!     Ok(())
//! }
//! ```

pub mod cellar;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod formula;
pub mod hash;
pub mod install;
pub mod lint;
pub mod receipt;
pub mod resource;
pub mod symlink;
pub mod toolchain;
pub mod ui;
pub mod verify;

pub use error::{IntegrityError, KegError, Result};
pub use formula::Formula;
