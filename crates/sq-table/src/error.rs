//! Table and query error types.

use thiserror::Error;

use crate::materialize::StructuredTable;

/// Errors raised while materializing or loading the structured table.
#[derive(Debug, Error)]
pub enum TableError {
    /// The raw log could not be read; no table can be built.
    #[error("data source unavailable: {0}")]
    DataSourceUnavailable(String),

    /// The artifact could not be written. `stale` is the previous artifact,
    /// still usable as a degraded fallback, if one exists.
    #[error("persistence error: {message}")]
    Persistence {
        message: String,
        stale: Option<Box<StructuredTable>>,
    },

    /// The artifact exists but could not be opened or copied into the engine.
    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),
}

/// Convenience alias for table results.
pub type TableResult<T> = Result<T, TableError>;

/// What went wrong with a single SQL execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// Refused before reaching the engine (empty, multi-statement, not a SELECT).
    Rejected,
    /// Reported by SQLite: syntax, unknown column/table, type mismatch, write attempt.
    Engine,
    /// Did not finish within the query timeout.
    Timeout,
}

/// A failed SQL execution. `message` carries the engine text verbatim.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Engine,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Timeout,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::engine(e.to_string())
    }
}
