//! Locating a usable dynomark executable
//!
//! Resolution happens on every command invocation; nothing is cached in
//! memory, only the downloaded file persists on disk.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::{ENGINE_NAME, EngineError, platform_artifact};

/// Where a resolved engine lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLocation {
    /// Resolvable through the search path at spawn time
    OnPath(String),
    /// Absolute path to a previously downloaded copy
    Cached(PathBuf),
}

impl EngineLocation {
    /// The program to hand to a process spawn.
    pub fn program(&self) -> &OsStr {
        match self {
            EngineLocation::OnPath(name) => OsStr::new(name),
            EngineLocation::Cached(path) => path.as_os_str(),
        }
    }
}

impl std::fmt::Display for EngineLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineLocation::OnPath(name) => write!(f, "{}", name),
            EngineLocation::Cached(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Finds dynomark, preferring the search path over the downloaded copy.
///
/// Fails with [`EngineError::NotAvailable`] when neither the lookup command
/// nor the cache file check succeeds. Never reports a cache path that does
/// not exist on disk.
pub async fn resolve_engine(storage_dir: &Path) -> Result<EngineLocation, EngineError> {
    if probe_search_path().await {
        debug!("Resolved {} on the search path", ENGINE_NAME);
        return Ok(EngineLocation::OnPath(ENGINE_NAME.to_string()));
    }

    let artifact =
        platform_artifact(env::consts::OS).ok_or(EngineError::NotAvailable)?;
    let cached = storage_dir.join(artifact.filename);
    if cached.is_file() {
        debug!("Resolved downloaded engine at {}", cached.display());
        Ok(EngineLocation::Cached(cached))
    } else {
        Err(EngineError::NotAvailable)
    }
}

/// Probes the search path with the platform lookup command.
async fn probe_search_path() -> bool {
    let lookup = if cfg!(windows) { "where" } else { "which" };
    Command::new(lookup)
        .arg(ENGINE_NAME)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
