//! Acquisition and invocation of the external dynomark engine
//!
//! The engine owns the query language end to end; this module only finds it
//! (`resolve`), downloads it when missing (`fetch`), and runs query text
//! through it with a timeout and retries (`run`).

pub mod fetch;
pub mod platform;
pub mod resolve;
pub mod run;

use std::time::Duration;

use thiserror::Error;

pub use fetch::{fetch_engine, fetch_from};
pub use platform::{PlatformArtifact, platform_artifact};
pub use resolve::{EngineLocation, resolve_engine};
pub use run::{QueryOutput, run_query, run_with_retry};
pub use run::{retry_with_ceiling, run_query_with_ceiling};

/// Name the engine goes by on the search path.
pub const ENGINE_NAME: &str = "dynomark";

/// Hard ceiling on a single engine invocation.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sequential attempts per query before the last error is propagated.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dynomark is not on the search path and no downloaded copy exists")]
    NotAvailable,

    #[error("unsupported platform '{0}': download dynomark manually and add it to PATH")]
    UnsupportedPlatform(String),

    #[error("failed to download dynomark: {0}")]
    Download(String),

    #[error("dynomark failed: {0}")]
    Execution(String),

    #[error("dynomark did not finish within {} seconds", QUERY_TIMEOUT.as_secs())]
    Timeout,
}
