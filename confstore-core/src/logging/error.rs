//! Errors raised while installing the log subscriber

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),

    /// `RUST_LOG` is set but not a valid filter
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },
}
