//! Running query text through the dynomark engine
//!
//! The query travels as a single argv element, so quote characters and shell
//! metacharacters inside it reach the engine untouched; no shell is involved.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{EngineError, EngineLocation, QUERY_TIMEOUT};

/// Output of a successful engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutput {
    /// Trimmed standard output, the query result
    pub stdout: String,
    /// Standard error, if any was emitted. Advisory even on success; the
    /// engine prints diagnostics there on healthy runs too.
    pub stderr: Option<String>,
}

/// Runs one query with the fixed 10-second ceiling.
///
/// # Arguments
/// * `engine` - Resolved engine location
/// * `query` - Trimmed block content
/// * `working_dir` - Directory relative paths in the query resolve against;
///   `None` leaves the server's own working directory in effect
pub async fn run_query(
    engine: &EngineLocation,
    query: &str,
    working_dir: Option<&Path>,
) -> Result<QueryOutput, EngineError> {
    run_query_with_ceiling(engine, query, working_dir, QUERY_TIMEOUT).await
}

/// Same as [`run_query`] with an explicit ceiling. Split out so tests can
/// exercise the timeout path without waiting out the production value.
pub async fn run_query_with_ceiling(
    engine: &EngineLocation,
    query: &str,
    working_dir: Option<&Path>,
    ceiling: Duration,
) -> Result<QueryOutput, EngineError> {
    let mut command = Command::new(engine.program());
    command
        .arg("--query")
        .arg(query)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the future on timeout must take the process with it.
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    debug!("Spawning {} --query ({} bytes)", engine, query.len());
    let child = command
        .spawn()
        .map_err(|e| EngineError::Execution(format!("failed to spawn {}: {}", engine, e)))?;

    let output = match timeout(ceiling, child.wait_with_output()).await {
        Err(_elapsed) => return Err(EngineError::Timeout),
        Ok(Err(e)) => return Err(EngineError::Execution(e.to_string())),
        Ok(Ok(output)) => output,
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stderr = (!stderr.is_empty()).then_some(stderr);

    if !output.status.success() {
        let message = stderr.unwrap_or_else(|| output.status.to_string());
        return Err(EngineError::Execution(message));
    }

    Ok(QueryOutput {
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr,
    })
}

/// Runs a query with up to `max_attempts` immediate retries.
///
/// No backoff: the dominant failures are either deterministic (a bad query,
/// which retrying cannot fix) or a one-off transient timeout. Each failed
/// attempt is logged with its number; the final attempt's error propagates.
pub async fn run_with_retry(
    engine: &EngineLocation,
    query: &str,
    working_dir: Option<&Path>,
    max_attempts: u32,
) -> Result<QueryOutput, EngineError> {
    retry_with_ceiling(engine, query, working_dir, max_attempts, QUERY_TIMEOUT).await
}

/// Same as [`run_with_retry`] with an explicit ceiling, for tests.
pub async fn retry_with_ceiling(
    engine: &EngineLocation,
    query: &str,
    working_dir: Option<&Path>,
    max_attempts: u32,
    ceiling: Duration,
) -> Result<QueryOutput, EngineError> {
    debug_assert!(max_attempts >= 1);
    let mut attempt = 1;
    loop {
        match run_query_with_ceiling(engine, query, working_dir, ceiling).await {
            Ok(output) => return Ok(output),
            Err(error) if attempt < max_attempts => {
                warn!(
                    "Query attempt {}/{} failed: {}",
                    attempt, max_attempts, error
                );
                attempt += 1;
            }
            Err(error) => {
                warn!(
                    "Query attempt {}/{} failed, giving up: {}",
                    attempt, max_attempts, error
                );
                return Err(error);
            }
        }
    }
}
