//! Tracing initialisation for binaries and test harnesses
//!
//! Libraries only emit through `tracing` macros; whoever owns `main` calls
//! [`init_tracing`] once.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install a fmt subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_level` (e.g. `"info"` or
/// `"cirrus_dispatch=debug,info"`) is used. Returns an error instead of
/// panicking when a global subscriber already exists.
pub fn init_tracing(default_level: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(default_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}

fn build_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter {
        filter: directives.to_string(),
        message: e.to_string(),
    })
}
