//! Table materializer: raw auth log to SQLite artifact, with an mtime cache.
//!
//! The artifact is rebuilt from the full log whenever it is missing or older
//! than the log. Rebuilds write to a temporary sibling file and rename it into
//! place, so a failed write leaves the previous artifact intact.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rusqlite::{Connection, OpenFlags, params};
use serde::Deserialize;

use sq_log_tools::{LogError, LogRecord, LogSource, ParserConfig, parse_lines};

use crate::error::{TableError, TableResult};

/// Column layout of the materialized table: (name, SQL type, NOT NULL).
///
/// Order matches [`LogRecord`] field order and is stable across rebuilds.
pub const COLUMNS: &[(&str, &str, bool)] = &[
    ("line_number", "INTEGER", true),
    ("timestamp", "TEXT", false),
    ("host", "TEXT", false),
    ("process", "TEXT", false),
    ("pid", "INTEGER", false),
    ("event_type", "TEXT", true),
    ("username", "TEXT", false),
    ("ip_address", "TEXT", false),
    ("port", "INTEGER", false),
    ("repetition_count", "INTEGER", true),
    ("raw_message", "TEXT", true),
];

/// Materialization settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MaterializeOptions {
    /// Name of the table inside the artifact (and the engine).
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub parser: ParserConfig,
}

fn default_table_name() -> String {
    "ssh".into()
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            parser: ParserConfig::default(),
        }
    }
}

/// Handle to a materialized artifact.
#[derive(Debug, Clone)]
pub struct StructuredTable {
    pub path: PathBuf,
    pub table_name: String,
    pub row_count: usize,
    /// Artifact modification time after this call.
    pub modified: SystemTime,
    /// True if this call rebuilt the artifact from the log.
    pub rebuilt: bool,
    /// Parse warnings recorded during the rebuild (0 when reused).
    pub warning_count: usize,
}

/// Ensure `table_path` holds an up-to-date artifact for `log_path`.
pub async fn ensure_materialized(
    source: &dyn LogSource,
    log_path: &str,
    table_path: &Path,
    options: &MaterializeOptions,
) -> TableResult<StructuredTable> {
    crate::check_identifier(&options.table_name)?;

    let log_modified = source.modified(log_path).await.map_err(unavailable)?;
    let artifact_modified = tokio::fs::metadata(table_path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .and_then(|m| m.modified().ok());

    if let Some(artifact_modified) = artifact_modified
        && artifact_modified >= log_modified
    {
        match open_existing(table_path, &options.table_name, artifact_modified).await {
            Ok(table) => {
                tracing::debug!(
                    path = %table_path.display(),
                    rows = table.row_count,
                    "artifact is fresh, reusing"
                );
                return Ok(table);
            }
            Err(e) => {
                tracing::warn!(error = %e, "existing artifact unreadable, rebuilding");
            }
        }
    }

    tracing::info!(
        log = log_path,
        artifact = %table_path.display(),
        "materializing table from log"
    );
    let lines = source.read_lines(log_path).await.map_err(unavailable)?;
    let output = parse_lines(&lines, &options.parser);
    if !output.warnings.is_empty() {
        tracing::info!(
            warnings = output.warnings.len(),
            "parse finished with per-line warnings"
        );
    }

    let row_count = output.records.len();
    let warning_count = output.warnings.len();
    let path = table_path.to_path_buf();
    let table_name = options.table_name.clone();
    let written = tokio::task::spawn_blocking(move || {
        write_artifact(&output.records, &path, &table_name, log_modified)
    })
    .await
    .map_err(|e| e.to_string())
    .and_then(|r| r);

    match written {
        Ok(modified) => {
            tracing::info!(rows = row_count, "artifact written");
            Ok(StructuredTable {
                path: table_path.to_path_buf(),
                table_name: options.table_name.clone(),
                row_count,
                modified,
                rebuilt: true,
                warning_count,
            })
        }
        Err(message) => {
            let stale = match artifact_modified {
                Some(modified) => open_existing(table_path, &options.table_name, modified)
                    .await
                    .ok()
                    .map(Box::new),
                None => None,
            };
            tracing::error!(
                error = %message,
                stale_available = stale.is_some(),
                "failed to write artifact"
            );
            Err(TableError::Persistence { message, stale })
        }
    }
}

fn unavailable(e: LogError) -> TableError {
    TableError::DataSourceUnavailable(e.to_string())
}

async fn open_existing(
    path: &Path,
    table_name: &str,
    modified: SystemTime,
) -> TableResult<StructuredTable> {
    let owned_path = path.to_path_buf();
    let owned_table = table_name.to_string();
    let row_count = tokio::task::spawn_blocking(move || count_rows(&owned_path, &owned_table))
        .await
        .map_err(|e| TableError::Artifact(e.to_string()))?
        .map_err(|e| TableError::Artifact(e.to_string()))?;
    Ok(StructuredTable {
        path: path.to_path_buf(),
        table_name: table_name.to_string(),
        row_count,
        modified,
        rebuilt: false,
        warning_count: 0,
    })
}

fn count_rows(path: &Path, table_name: &str) -> rusqlite::Result<usize> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM \"{table_name}\""), [], |row| {
            row.get(0)
        })?;
    Ok(usize::try_from(count).unwrap_or(0))
}

pub(crate) fn create_table_sql(table_name: &str) -> String {
    let columns = COLUMNS
        .iter()
        .map(|(name, ty, not_null)| {
            if *not_null {
                format!("\"{name}\" {ty} NOT NULL")
            } else {
                format!("\"{name}\" {ty}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE \"{table_name}\" ({columns});")
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write all records to a fresh artifact and return its modification time.
///
/// The artifact's mtime is set to the log mtime the build was read at, so
/// any later log write, including one landing during the build, makes it stale.
fn write_artifact(
    records: &[LogRecord],
    path: &Path,
    table_name: &str,
    log_modified: SystemTime,
) -> Result<SystemTime, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| format!("{}: {e}", parent.display()))?;
    }
    let tmp = tmp_path(path);
    if tmp.exists() {
        std::fs::remove_file(&tmp).map_err(|e| format!("{}: {e}", tmp.display()))?;
    }

    insert_records(records, &tmp, table_name).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        format!("{}: {e}", tmp.display())
    })?;

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        format!("{}: {e}", path.display())
    })?;

    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    file.set_modified(log_modified)
        .and_then(|()| file.metadata())
        .and_then(|meta| meta.modified())
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn insert_records(records: &[LogRecord], path: &Path, table_name: &str) -> rusqlite::Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(&create_table_sql(table_name))?;

    let placeholders = vec!["?"; COLUMNS.len()].join(", ");
    let tx = conn.transaction()?;
    {
        let mut stmt =
            tx.prepare(&format!("INSERT INTO \"{table_name}\" VALUES ({placeholders})"))?;
        for r in records {
            stmt.execute(params![
                r.line_number as i64,
                r.timestamp_text(),
                r.host,
                r.process,
                r.pid,
                r.event_type.as_str(),
                r.username,
                r.ip_address,
                r.port,
                r.repetition_count,
                r.raw_message,
            ])?;
        }
    }
    tx.commit()
}
