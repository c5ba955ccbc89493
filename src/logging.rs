//! Logging setup: stderr for the operator, a DEBUG session file for bug reports
//!
//! Session logs land in the user cache directory and are pruned by age so an
//! always-on server does not accumulate them forever.

use std::fs;
use std::io;
use std::path::PathBuf;

use time::UtcOffset;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{self, fmt, prelude::*};

const LOG_RETENTION_DAYS: u64 = 7;

/// Log directory in the user cache directory:
/// - Linux: ~/.cache/dynomark-language-server/
/// - macOS: ~/Library/Caches/dynomark-language-server/
/// - Windows: %LOCALAPPDATA%\dynomark-language-server\
fn log_dir() -> io::Result<PathBuf> {
    let cache_dir = dirs::cache_dir().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "Unable to determine user cache directory",
        )
    })?;

    let log_dir = cache_dir.join("dynomark-language-server");
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }
    Ok(log_dir)
}

/// Removes session logs older than [`LOG_RETENTION_DAYS`].
fn cleanup_old_logs(log_dir: &PathBuf) {
    let now = std::time::SystemTime::now();
    let retention = std::time::Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);

    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with("session-") && name.ends_with(".log")) {
            continue;
        }
        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if expired {
            if let Err(e) = fs::remove_file(entry.path()) {
                eprintln!("Failed to remove old log file {:?}: {}", entry.path(), e);
            }
        }
    }
}

/// Initializes the logger with stderr output and, optionally, a session file.
///
/// Returns a [`WorkerGuard`] that must be kept alive for the duration of the
/// program so buffered file output is flushed on exit.
///
/// # Arguments
/// * `no_color` - Disable ANSI colors in stderr output
/// * `log_level` - Override the stderr level (otherwise `RUST_LOG` or "info")
/// * `enable_file_logging` - Write a DEBUG-level session file (disable for tests)
pub fn init_logger(
    no_color: bool,
    log_level: Option<&str>,
    enable_file_logging: bool,
) -> io::Result<WorkerGuard> {
    let timer = fmt::time::OffsetTime::new(
        UtcOffset::UTC,
        format_description!(
            "[[[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z]"
        ),
    );

    let stderr_filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(timer.clone())
        .with_ansi(!no_color)
        .with_filter(stderr_filter);

    if enable_file_logging {
        let log_dir = log_dir()?;
        cleanup_old_logs(&log_dir);

        let timestamp = time::OffsetDateTime::now_utc()
            .format(&time::format_description::parse(
                "[year][month][day]-[hour][minute][second]",
            ).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let log_path = log_dir.join(format!("session-{}-{}.log", timestamp, std::process::id()));

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_timer(timer)
            .with_ansi(false)
            .with_filter(tracing_subscriber::EnvFilter::new("debug"));

        try_init(
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer),
        )?;
        eprintln!("Logging to file: {:?}", log_path);
        Ok(guard)
    } else {
        let (_, guard) = tracing_appender::non_blocking(std::io::sink());
        try_init(tracing_subscriber::registry().with(stderr_layer))?;
        Ok(guard)
    }
}

/// Installs the subscriber, tolerating re-initialization (tests initialize
/// more than once per process).
fn try_init<S>(subscriber: S) -> io::Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    }
}
