//! Tracing setup for hosts embedding the pipeline.
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`). When a log
//! directory is given, a daily-rotated copy is written there as well.

use crate::error::{Result, SpeechError};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// File name prefix of rotated log files (`attune.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "attune.log";

/// Returns `~/.local/state/attune/logs`, or a temp-dir path without `HOME`.
pub fn default_log_dir() -> PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        PathBuf::from(state).join("attune").join("logs")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("attune")
            .join("logs")
    } else {
        std::env::temp_dir().join("attune").join("logs")
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; hold it for the
/// life of the process. `None` means no file output was requested.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .map_err(|e| SpeechError::Config(format!("tracing already initialised: {e}")))?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| SpeechError::Config(format!("tracing already initialised: {e}")))?;

    tracing::info!(dir = %dir.display(), "file logging enabled");
    Ok(Some(guard))
}
