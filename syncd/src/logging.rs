//! Subscriber setup for the daemon.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid log filter {level:?}: {reason}")]
    Filter { level: String, reason: String },
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to the
/// configured file in append mode, or to stderr.
///
/// # Errors
///
/// Returns [`LoggingError`] when the filter is invalid, the log file cannot be
/// opened, or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| LoggingError::Filter {
            level: config.level.clone(),
            reason: err.to_string(),
        })?;

    if let Some(path) = &config.path {
        let file = open_log_file(path)?;
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(file));
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .map_err(|err| LoggingError::Init(err.to_string()))?;
    } else {
        let layer = fmt::layer().with_target(true).with_writer(io::stderr);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .map_err(|err| LoggingError::Init(err.to_string()))?;
    }

    tracing::debug!(level = %config.level, file = ?config.path, "logging initialized");
    Ok(())
}

fn open_log_file(path: &Path) -> Result<fs::File, LoggingError> {
    let open_error = |source| LoggingError::Open {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(open_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_error)
}
