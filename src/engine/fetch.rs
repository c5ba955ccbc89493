//! Downloading the dynomark engine from its release endpoint
//!
//! Redirects are followed by hand (the release endpoint answers with one hop
//! to the CDN); any status other than a redirect or success is fatal. The
//! body streams straight to the cache file, and a failure after the file has
//! been created removes it again so the resolver never sees a partial
//! executable.

use std::env;
use std::path::{Path, PathBuf};

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::{EngineError, platform_artifact};

const MAX_REDIRECTS: usize = 5;

/// Downloads the engine build for the current platform into `storage_dir`
/// and returns the path of the finished executable.
pub async fn fetch_engine(storage_dir: &Path) -> Result<PathBuf, EngineError> {
    let artifact = platform_artifact(env::consts::OS)
        .ok_or_else(|| EngineError::UnsupportedPlatform(env::consts::OS.to_string()))?;

    fs::create_dir_all(storage_dir)
        .await
        .map_err(|e| EngineError::Download(format!("cannot create storage dir: {}", e)))?;

    let target = storage_dir.join(artifact.filename);
    info!("Downloading {} to {}", artifact.url, target.display());
    fetch_from(artifact.url, &target).await?;
    info!("Engine downloaded to {}", target.display());
    Ok(target)
}

/// Downloads `url` to `target`, following redirects manually and marking the
/// result executable on POSIX platforms. On any failure after `target` was
/// created, the partial file is removed before the error propagates.
pub async fn fetch_from(url: &str, target: &Path) -> Result<(), EngineError> {
    match download(url, target).await {
        Ok(()) => mark_executable(target).await,
        Err(e) => {
            if fs::remove_file(target).await.is_ok() {
                warn!("Removed partial download at {}", target.display());
            }
            Err(e)
        }
    }
}

async fn download(url: &str, target: &Path) -> Result<(), EngineError> {
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .map_err(|e| EngineError::Download(e.to_string()))?;

    let mut url = Url::parse(url).map_err(|e| EngineError::Download(e.to_string()))?;

    for _hop in 0..=MAX_REDIRECTS {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| EngineError::Download(e.to_string()))?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    EngineError::Download(format!("{} without a Location header", status))
                })?;
            // Location may be relative; resolve it against the request URL.
            url = url
                .join(location)
                .map_err(|e| EngineError::Download(format!("bad redirect target: {}", e)))?;
            debug!("Following redirect to {}", url);
            continue;
        }

        if !status.is_success() {
            return Err(EngineError::Download(format!(
                "unexpected status {} from {}",
                status, url
            )));
        }

        return write_body(response, target).await;
    }

    Err(EngineError::Download(format!(
        "more than {} redirects",
        MAX_REDIRECTS
    )))
}

async fn write_body(mut response: reqwest::Response, target: &Path) -> Result<(), EngineError> {
    let mut file = fs::File::create(target)
        .await
        .map_err(|e| EngineError::Download(format!("cannot create {}: {}", target.display(), e)))?;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| EngineError::Download(e.to_string()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| EngineError::Download(format!("write failed: {}", e)))?;
    }

    file.flush()
        .await
        .map_err(|e| EngineError::Download(format!("flush failed: {}", e)))
}

#[cfg(unix)]
async fn mark_executable(target: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| EngineError::Download(format!("cannot set execute permission: {}", e)))
}

#[cfg(not(unix))]
async fn mark_executable(_target: &Path) -> Result<(), EngineError> {
    Ok(())
}
