//! Tracing setup: stderr plus a daily-rolling log file

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding an `EnvFilter` directive
pub const LOG_ENV: &str = "HV_LOG";

const LOG_FILE_PREFIX: &str = "hv.log";

/// Keeps the background log writer alive; flushes on drop
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `HV_LOG` wins over `-v`, which wins over the configured level. An
/// unusable log directory degrades to stderr-only logging.
pub fn init_logging(verbose: bool, level: &str, log_dir: Option<&Path>) -> Result<LogGuard> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))?,
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(|dir| std::fs::create_dir_all(dir).map(|_| dir)) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let (Some(e), Some(dir)) = (file_error, log_dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "Log directory unusable, logging to stderr only");
    }

    Ok(LogGuard { _file: guard })
}
