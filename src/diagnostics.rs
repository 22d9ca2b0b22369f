//! Tracing setup for hosts embedding the session runtime.
//!
//! Logs always go to stderr. With `logging.file_logging` enabled they are
//! also written to daily-rotated files (`avatar-session.YYYY-MM-DD.log`),
//! keeping the newest [`MAX_LOG_FILES`].

use crate::config::LoggingConfig;
use crate::error::{Result, SessionError};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Rotated log files kept on disk.
pub const MAX_LOG_FILES: usize = 7;

/// Build the filter: `RUST_LOG` wins, otherwise the configured directive.
///
/// # Errors
///
/// Returns [`SessionError::Config`] if the configured directive is invalid.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter)
        .map_err(|e| SessionError::Config(format!("invalid log filter {:?}: {e}", config.filter)))
}

/// Directory for rotated log files.
#[must_use]
pub fn log_dir(config: &LoggingConfig) -> PathBuf {
    config.log_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("avatar-session")
            .join("logs")
    })
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as file logs should be flushed.
///
/// # Errors
///
/// Returns [`SessionError::Config`] for an invalid filter or when a global
/// subscriber is already installed, and an I/O error if the log directory
/// cannot be created.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let (file, guard) = if config.file_logging {
        let dir = log_dir(config);
        std::fs::create_dir_all(&dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("avatar-session")
            .filename_suffix("log")
            .max_log_files(MAX_LOG_FILES)
            .build(&dir)
            .map_err(|e| SessionError::Config(format!("cannot open log file: {e}")))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| SessionError::Config(format!("tracing already initialised: {e}")))?;

    tracing::info!(file_logging = config.file_logging, "logging initialised");
    Ok(guard)
}
