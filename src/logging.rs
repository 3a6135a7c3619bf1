//! Tracing setup.
//!
//! Stdout carries the helper protocol, so logs go to stderr or, when a log
//! directory is configured, to a daily rolling file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

/// File name prefix for rolling log files.
const LOG_FILE_PREFIX: &str = "mailscan-helper.log";

/// Install the global subscriber.
///
/// The returned guard flushes buffered file output on drop and must be held
/// for the lifetime of the process.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
            Ok(None)
        }
    }
}
