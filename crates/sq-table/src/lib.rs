//! Structured table layer for sshq.
//!
//! - [`materialize`]: turns a raw auth log into a SQLite artifact, rebuilding
//!   only when the log is newer than the artifact.
//! - [`relation`]: loads the artifact into an in-memory, query-only SQLite
//!   connection and executes SQL against it.
//! - [`schema`]: derives the column/type/sample description used to ground
//!   the agent.

pub mod error;
pub mod materialize;
pub mod relation;
pub mod schema;

use std::sync::Arc;

pub use error::{QueryError, QueryErrorKind, TableError, TableResult};
pub use materialize::{COLUMNS, MaterializeOptions, StructuredTable, ensure_materialized};
pub use relation::{CellValue, QueryResult, QueryableRelation, RelationOptions};
pub use schema::{ColumnDescription, SchemaDescription, SchemaFormat};

/// A loaded relation together with its schema description.
///
/// The schema is computed once per load and shared read-only with every
/// query session.
#[derive(Clone)]
pub struct LoadedTable {
    pub table: StructuredTable,
    pub relation: Arc<QueryableRelation>,
    pub schema: Arc<SchemaDescription>,
}

impl LoadedTable {
    /// Load the artifact into the engine and introspect it.
    pub async fn load(table: StructuredTable, options: RelationOptions) -> TableResult<Self> {
        let relation = QueryableRelation::load(&table, options).await?;
        let schema = SchemaDescription::introspect(&relation).await?;
        tracing::info!(
            table = %schema.table,
            rows = schema.row_count,
            columns = schema.columns.len(),
            "relation loaded"
        );
        Ok(Self {
            table,
            relation: Arc::new(relation),
            schema: Arc::new(schema),
        })
    }
}

/// Validate that `name` is a plain SQL identifier safe to interpolate.
pub(crate) fn check_identifier(name: &str) -> TableResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TableError::InvalidTableName(name.to_string()))
    }
}
