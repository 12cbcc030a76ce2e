//! Archive downloads into the cache, with digest verification.
//!
//! `https://`/`http://` URLs are fetched with reqwest and a progress bar;
//! `file://` URLs and bare paths are copied, which lets formulas point at
//! local archives. A cached archive is reused only if it still matches its
//! declared digest; otherwise it is fetched again.

use crate::config::Config;
use crate::error::{IntegrityError, KegError, Result};
use crate::hash::{self, Sha256Digest};
use crate::ui;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Cached file name for an archive: `<name>--<basename of url>`
pub fn cache_file_name(name: &str, url: &str) -> String {
    let base = match url_basename(url) {
        "" => "archive",
        base => base,
    };
    format!("{}--{}", name, base)
}

/// Last path segment of a URL
pub fn url_basename(url: &str) -> &str {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
}

pub fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(format!("keg/{}", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Fetch `url` into the download cache and verify it against `declared`.
///
/// Returns the cached path. On mismatch the file is deleted and an
/// integrity error is returned.
pub async fn fetch_verified(
    config: &Config,
    client: &reqwest::Client,
    name: &str,
    url: &str,
    declared: &str,
) -> Result<PathBuf> {
    if declared.trim().is_empty() {
        return Err(IntegrityError::MissingHash(name.to_string()).into());
    }
    Sha256Digest::parse(declared).map_err(|reason| IntegrityError::Malformed {
        name: name.to_string(),
        reason,
    })?;

    let cache = config.downloads_dir();
    fs::create_dir_all(&cache).await.map_err(|e| {
        KegError::Install(format!(
            "failed to create cache directory {}: {}",
            cache.display(),
            e
        ))
    })?;
    let output_path = cache.join(cache_file_name(name, url));

    if output_path.exists() {
        match hash::verify_file(name, &output_path, declared) {
            Ok(_) => {
                debug!("using cached {}", output_path.display());
                return Ok(output_path);
            }
            Err(_) => {
                debug!("cached {} is stale, fetching again", output_path.display());
                fs::remove_file(&output_path).await?;
            }
        }
    }

    download_to(client, url, &output_path, name).await?;

    if let Err(e) = hash::verify_file(name, &output_path, declared) {
        fs::remove_file(&output_path).await?;
        return Err(e);
    }

    info!("verified {} ({})", name, url);
    Ok(output_path)
}

/// Download or copy `url` to `dest` without verification
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    label: &str,
) -> Result<()> {
    if let Some(local) = local_path(url) {
        debug!("copying {} to {}", local.display(), dest.display());
        fs::copy(&local, dest).await.map_err(|e| {
            KegError::Install(format!("failed to copy {}: {}", local.display(), e))
        })?;
        return Ok(());
    }

    debug!("downloading {}", url);
    let mut response = client.get(url).send().await?.error_for_status()?;

    let pb = ui::download_bar(label, response.content_length());

    let mut file = fs::File::create(dest).await.map_err(|e| {
        KegError::Install(format!("failed to create {}: {}", dest.display(), e))
    })?;
    let mut downloaded: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().await?;
    pb.finish_and_clear();

    Ok(())
}

/// Download `url` to a scratch file in the cache and return its digest
pub async fn digest_url(
    config: &Config,
    client: &reqwest::Client,
    url: &str,
) -> Result<Sha256Digest> {
    let scratch_dir = config.cache_dir.join("scratch");
    fs::create_dir_all(&scratch_dir).await?;
    let scratch = scratch_dir.join(url_basename(url));

    let result = match download_to(client, url, &scratch, url_basename(url)).await {
        Ok(()) => hash::file_digest(&scratch).map_err(KegError::from),
        Err(e) => Err(e),
    };

    if scratch.exists() {
        fs::remove_file(&scratch).await?;
    }
    result
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}
