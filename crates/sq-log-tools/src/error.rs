//! Log source error types.

use thiserror::Error;

/// Errors that can occur while reading log data.
///
/// Parsing itself never fails; malformed lines become `ParseWarning`s.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("source not found: {0}")]
    NotFound(String),
}

/// Convenience alias for log source results.
pub type LogResult<T> = Result<T, LogError>;
