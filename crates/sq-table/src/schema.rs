//! Schema introspection for agent grounding.

use serde::Serialize;

use crate::error::TableResult;
use crate::relation::{CellValue, QueryableRelation};

const MAX_SAMPLES: usize = 3;
const MAX_SAMPLE_CHARS: usize = 80;

/// One column of the live relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    /// Up to three distinct non-null values, truncated for display.
    pub samples: Vec<String>,
}

/// Table name, row count, and column descriptions of the live relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescription {
    pub table: String,
    pub row_count: usize,
    pub columns: Vec<ColumnDescription>,
}

/// Output format for [`SchemaDescription::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for SchemaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown schema format '{other}' (expected text or json)")),
        }
    }
}

impl SchemaDescription {
    /// Describe the relation using only read-only queries against it.
    ///
    /// Metadata reads bypass the per-query row cap so every column is described.
    pub async fn introspect(relation: &QueryableRelation) -> TableResult<Self> {
        let table = relation.table_name().to_string();
        let info = relation
            .read_all(&format!(
                "SELECT name, type, \"notnull\" FROM pragma_table_info('{table}') ORDER BY cid"
            ))
            .await?;

        let mut columns = Vec::with_capacity(info.rows.len());
        for row in &info.rows {
            let name = row.first().map(ToString::to_string).unwrap_or_default();
            let declared_type = row.get(1).map(ToString::to_string).unwrap_or_default();
            let not_null = row.get(2).and_then(CellValue::as_i64).unwrap_or(0) != 0;

            let sampled = relation
                .read_all(&format!(
                    "SELECT DISTINCT \"{name}\" FROM \"{table}\" WHERE \"{name}\" IS NOT NULL LIMIT {MAX_SAMPLES}"
                ))
                .await?;
            let samples = sampled
                .rows
                .iter()
                .filter_map(|r| r.first())
                .map(|cell| truncate(&cell.to_string()))
                .collect();

            columns.push(ColumnDescription {
                name,
                declared_type,
                nullable: !not_null,
                samples,
            });
        }

        tracing::debug!(table = %table, columns = columns.len(), "schema introspected");

        Ok(Self {
            table,
            row_count: relation.row_count(),
            columns,
        })
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescription> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Grounding text for the model's system prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut out = format!(
            "Table `{}` ({} rows). Columns:\n",
            self.table, self.row_count
        );
        for col in &self.columns {
            let null = if col.nullable { "NULL" } else { "NOT NULL" };
            out.push_str(&format!("- {} {} {}", col.name, col.declared_type, null));
            if !col.samples.is_empty() {
                let samples: Vec<String> =
                    col.samples.iter().map(|s| format!("'{s}'")).collect();
                out.push_str(&format!(" (e.g. {})", samples.join(", ")));
            }
            out.push('\n');
        }
        out
    }

    pub fn render(&self, format: SchemaFormat) -> String {
        match format {
            SchemaFormat::Text => self.to_prompt_text(),
            SchemaFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
        }
    }
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= MAX_SAMPLE_CHARS {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(MAX_SAMPLE_CHARS).collect();
    cut.push_str("...");
    cut
}
