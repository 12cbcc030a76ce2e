//! Generating resource pins.
//!
//! Pinning a library means finding its source archive and recording the
//! archive's digest. `keg hash` does this for explicit URLs; `keg pypi` tries
//! the usual PyPI sdist locations for `name==version` until one downloads.

use crate::config::Config;
use crate::download;
use crate::error::{KegError, Result};
use crate::formula::Resource;
use tracing::debug;

const PYPI_SOURCE: &str = "https://files.pythonhosted.org/packages/source";

/// Parse `name==version`
pub fn parse_requirement(spec: &str) -> Result<(String, String)> {
    match spec.split_once("==") {
        Some((name, version)) if !name.trim().is_empty() && !version.trim().is_empty() => {
            Ok((name.trim().to_string(), version.trim().to_string()))
        }
        _ => Err(KegError::Formula(format!(
            "expected name==version, got '{}'",
            spec
        ))),
    }
}

/// Candidate sdist URLs for a PyPI package, in the order they are tried
pub fn pypi_sdist_candidates(name: &str, version: &str) -> Vec<String> {
    let initial = name
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or('_');

    let mut candidates = Vec::new();
    for project in [
        name.to_string(),
        name.replace('-', "_"),
        name.replace('-', ""),
    ] {
        for file in [name.to_string(), name.replace('-', "_")] {
            let url = format!(
                "{}/{}/{}/{}-{}.tar.gz",
                PYPI_SOURCE, initial, project, file, version
            );
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }
    }
    candidates
}

/// Render a resource as a formula stanza
pub fn stanza(resource: &Resource) -> String {
    format!(
        "[[release.resource]]\nname = \"{}\"\nurl = \"{}\"\nsha256 = \"{}\"\n",
        resource.name, resource.url, resource.sha256
    )
}

/// Guess a resource name from an archive URL (`click-8.1.7.tar.gz` → `click`)
pub fn name_from_url(url: &str) -> String {
    let file = download::url_basename(url);
    let mut parts = Vec::new();
    for part in file.split('-') {
        if part.starts_with(|c: char| c.is_ascii_digit()) {
            break;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        file.to_string()
    } else {
        parts.join("-").replace('_', "-")
    }
}

/// Download `url` and pin it
pub async fn pin_url(
    config: &Config,
    client: &reqwest::Client,
    name: Option<&str>,
    url: &str,
) -> Result<Resource> {
    let sha256 = download::digest_url(config, client, url).await?;
    Ok(Resource {
        name: name.map(str::to_string).unwrap_or_else(|| name_from_url(url)),
        url: url.to_string(),
        sha256: sha256.to_string(),
    })
}

/// Pin `name==version` from PyPI, trying each candidate URL
pub async fn pin_pypi(config: &Config, client: &reqwest::Client, spec: &str) -> Result<Resource> {
    let (name, version) = parse_requirement(spec)?;

    let mut last_error = None;
    for url in pypi_sdist_candidates(&name, &version) {
        match pin_url(config, client, Some(&name), &url).await {
            Ok(resource) => return Ok(resource),
            Err(e) => {
                debug!("{} failed: {}", url, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        KegError::Formula(format!("no source archive found for {}", spec))
    }))
}
