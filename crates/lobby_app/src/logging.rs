use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,lobby_app=debug,lobby_network=debug";

/// Base directory for config and logs: `~/.lobby`
pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".lobby"))
}

/// Initializes the logging system with file + console output under
/// `~/.lobby/logs`. Returns a guard that must be kept alive for the duration
/// of the process.
pub fn init_logging() -> Result<WorkerGuard> {
    init_logging_in(&base_dir()?.join("logs"))
}

/// Same as [`init_logging`], writing the daily log files into `logs_dir`.
/// Fails instead of panicking when a global subscriber is already installed.
pub fn init_logging_in(logs_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("create log directory {}", logs_dir.display()))?;

    // File appender: daily rotation
    let file_appender = tracing_appender::rolling::daily(logs_dir, "lobby");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_in_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());

        // Only one test per process can install the subscriber; the
        // directory is created either way.
        let _guard = init_logging_in(&logs_dir);
        assert!(logs_dir.exists());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
