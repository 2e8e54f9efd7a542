//! Embedded SQL engine binding.
//!
//! The artifact is copied into an in-memory SQLite connection and marked
//! `query_only`, so no statement can modify it. Statements run one at a
//! time on the blocking pool; callers on the async side only wait.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, TableError, TableResult};
use crate::materialize::StructuredTable;

/// Engine binding settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationOptions {
    /// Reject anything but a single SELECT/WITH statement before it reaches the engine.
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Maximum rows returned per query; extra rows are dropped and flagged.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Default per-query timeout in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_strict() -> bool {
    true
}
fn default_max_rows() -> usize {
    200
}
fn default_query_timeout_secs() -> u64 {
    10
}

impl Default for RelationOptions {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            max_rows: default_max_rows(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

// ── Query results ─────────────────────────────────────────────

/// A single cell of a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl CellValue {
    fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Text(b.iter().map(|byte| format!("{byte:02x}")).collect()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Columns and rows returned by a successful query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names in statement projection order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// True if rows were dropped to honor `max_rows`.
    pub truncated: bool,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Render as CSV with a header row.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| csv_field(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
        for row in &self.rows {
            let line = row
                .iter()
                .map(|cell| csv_field(&cell.to_string()))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
        if self.truncated {
            out.push_str(&format!("# truncated to {} rows\n", self.rows.len()));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ── Relation ──────────────────────────────────────────────────

/// The live, read-only, in-memory relation built from a [`StructuredTable`].
pub struct QueryableRelation {
    conn: Arc<Mutex<Connection>>,
    interrupt: InterruptHandle,
    /// Ticket of the statement currently on the connection (0 = idle).
    /// Held while interrupting, so the interrupt cannot land on a later statement.
    running: Arc<Mutex<u64>>,
    next_ticket: AtomicU64,
    table_name: String,
    row_count: usize,
    options: RelationOptions,
}

impl QueryableRelation {
    /// Copy the artifact into an in-memory engine and register it read-only.
    pub async fn load(table: &StructuredTable, options: RelationOptions) -> TableResult<Self> {
        crate::check_identifier(&table.table_name)?;
        let path = table.path.clone();
        let table_name = table.table_name.clone();
        let (conn, row_count) =
            tokio::task::spawn_blocking(move || open_in_memory(&path, &table_name))
                .await
                .map_err(|e| TableError::Artifact(e.to_string()))?
                .map_err(|e| TableError::Artifact(e.to_string()))?;

        tracing::debug!(
            table = %table.table_name,
            rows = row_count,
            "artifact copied into in-memory engine"
        );

        Ok(Self {
            interrupt: conn.get_interrupt_handle(),
            conn: Arc::new(Mutex::new(conn)),
            running: Arc::new(Mutex::new(0)),
            next_ticket: AtomicU64::new(1),
            table_name: table.table_name.clone(),
            row_count,
            options,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Row count at load time. The relation is immutable afterwards.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn options(&self) -> &RelationOptions {
        &self.options
    }

    /// Execute `sql` with the default timeout.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        let timeout = Duration::from_secs(self.options.query_timeout_secs);
        self.execute_with_timeout(sql, timeout).await
    }

    /// Execute `sql`, giving up (and interrupting the engine) after `timeout`.
    pub async fn execute_with_timeout(
        &self,
        sql: &str,
        timeout: Duration,
    ) -> Result<QueryResult, QueryError> {
        let sql = strip_trailing_semicolons(sql);
        if self.options.strict {
            validate_read_only(sql)?;
        }
        self.run(sql, timeout, self.options.max_rows).await
    }

    /// Run an internal read with no row cap, for metadata the caller must see in full.
    pub(crate) async fn read_all(&self, sql: &str) -> Result<QueryResult, QueryError> {
        let timeout = Duration::from_secs(self.options.query_timeout_secs);
        self.run(strip_trailing_semicolons(sql), timeout, usize::MAX)
            .await
    }

    async fn run(
        &self,
        sql: &str,
        timeout: Duration,
        max_rows: usize,
    ) -> Result<QueryResult, QueryError> {
        let sql = sql.to_string();
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        let conn = self.conn.clone();
        let running = self.running.clone();
        let task_cancelled = cancelled.clone();
        let strict = self.options.strict;

        let task = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| QueryError::engine("relation connection lock poisoned"))?;
            {
                // Publish the ticket and check the flag under one lock, so the
                // timeout side either sees the ticket or we see the flag.
                let mut current = lock_running(&running);
                if task_cancelled.load(Ordering::SeqCst) {
                    return Err(QueryError::timeout("query timed out before it started"));
                }
                *current = ticket;
            }
            let result = run_query(&guard, &sql, max_rows, strict);
            *lock_running(&running) = 0;
            result
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(QueryError::engine(format!("query task failed: {join}"))),
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                self.interrupt_if_running(ticket);
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "query timed out");
                Err(QueryError::timeout(format!(
                    "query exceeded timeout of {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Interrupt the engine only if `ticket` is still the running statement.
    ///
    /// The running slot stays locked across the interrupt; the next statement
    /// cannot publish its ticket, and so cannot start, until it is released.
    fn interrupt_if_running(&self, ticket: u64) -> bool {
        let current = lock_running(&self.running);
        if *current != ticket {
            return false;
        }
        self.interrupt.interrupt();
        true
    }
}

fn lock_running(running: &Mutex<u64>) -> MutexGuard<'_, u64> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open_in_memory(path: &Path, table_name: &str) -> rusqlite::Result<(Connection, usize)> {
    let src = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut mem = Connection::open_in_memory()?;
    {
        let backup = Backup::new(&src, &mut mem)?;
        backup.run_to_completion(256, Duration::ZERO, None)?;
    }
    mem.execute_batch("PRAGMA query_only = ON;")?;
    let count: i64 =
        mem.query_row(&format!("SELECT COUNT(*) FROM \"{table_name}\""), [], |row| {
            row.get(0)
        })?;
    Ok((mem, usize::try_from(count).unwrap_or(0)))
}

fn run_query(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
    strict: bool,
) -> Result<QueryResult, QueryError> {
    let mut stmt = conn.prepare(sql)?;
    if strict && !stmt.readonly() {
        return Err(QueryError::rejected("only read-only statements are allowed"));
    }
    let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(CellValue::from_ref(row.get_ref(i)?));
        }
        out.push(cells);
    }

    Ok(QueryResult {
        columns,
        rows: out,
        truncated,
    })
}

fn strip_trailing_semicolons(sql: &str) -> &str {
    let mut candidate = sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

/// Reject empty input, multiple statements, and anything not SELECT/WITH.
fn validate_read_only(sql: &str) -> Result<(), QueryError> {
    if sql.is_empty() {
        return Err(QueryError::rejected(
            "SQL query is empty; provide a single SELECT statement",
        ));
    }
    if sql.contains(';') && !semicolons_only_in_literals(sql) {
        return Err(QueryError::rejected(
            "multiple statements are not allowed; submit exactly one SELECT",
        ));
    }
    let lowered = skip_leading_comments(sql)
        .trim_start_matches('(')
        .to_ascii_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        let keyword = lowered.split_whitespace().next().unwrap_or_default();
        return Err(QueryError::rejected(format!(
            "only SELECT queries are allowed (got `{keyword}`)"
        )));
    }
    Ok(())
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            return rest;
        }
    }
}

/// True if every `;` in `sql` sits inside a single-quoted string literal.
fn semicolons_only_in_literals(sql: &str) -> bool {
    let mut in_literal = false;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            ';' if !in_literal => return false,
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryErrorKind;
    use crate::materialize::{MaterializeOptions, ensure_materialized};
    use sq_log_tools::mock::SAMPLE_AUTH_LOG;
    use sq_log_tools::{MockLogSource, ParserConfig};

    async fn sample_relation(options: RelationOptions) -> (tempfile::TempDir, QueryableRelation) {
        let dir = tempfile::tempdir().unwrap();
        let source = MockLogSource::with_auth_sample();
        let table = ensure_materialized(
            &source,
            SAMPLE_AUTH_LOG,
            &dir.path().join("ssh.sqlite"),
            &MaterializeOptions {
                table_name: "ssh".into(),
                parser: ParserConfig::with_year(2024),
            },
        )
        .await
        .unwrap();
        let relation = QueryableRelation::load(&table, options).await.unwrap();
        (dir, relation)
    }

    #[tokio::test]
    async fn count_matches_row_count() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let result = rel.execute("SELECT COUNT(*) AS n FROM ssh;").await.unwrap();
        assert_eq!(result.columns, vec!["n"]);
        assert_eq!(result.rows[0][0].as_i64(), Some(rel.row_count() as i64));
        assert_eq!(rel.row_count(), 14);
    }

    #[tokio::test]
    async fn select_star_uses_declared_column_order() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let result = rel.execute("SELECT * FROM ssh LIMIT 1").await.unwrap();
        let expected: Vec<&str> = crate::COLUMNS.iter().map(|(n, _, _)| *n).collect();
        assert_eq!(result.columns, expected);
        assert_eq!(result.rows[0][5].as_str(), Some("failed_login"));
        assert_eq!(result.rows[0][1].as_str(), Some("2024-06-10 10:00:01"));
    }

    #[tokio::test]
    async fn failed_logins_by_ip() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let result = rel
            .execute(
                "SELECT ip_address, COUNT(*) AS attempts FROM ssh \
                 WHERE event_type = 'failed_login' GROUP BY ip_address \
                 ORDER BY attempts DESC, ip_address",
            )
            .await
            .unwrap();
        assert_eq!(result.rows[0][0].as_str(), Some("203.0.113.10"));
        assert_eq!(result.rows[0][1].as_i64(), Some(4));
        assert_eq!(result.rows[1][0].as_str(), Some("192.0.2.44"));
    }

    #[tokio::test]
    async fn syntax_error_is_query_error() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let err = rel.execute("SELECT FROM WHERE ssh").await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Engine);
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn unknown_column_message_is_verbatim() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let err = rel.execute("SELECT nope FROM ssh").await.unwrap_err();
        assert!(err.message.contains("nope"), "got: {}", err.message);
    }

    #[tokio::test]
    async fn strict_mode_rejects_writes_and_batches() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        for sql in [
            "DELETE FROM ssh",
            "",
            "SELECT 1; DROP TABLE ssh",
            "PRAGMA query_only = OFF",
        ] {
            let err = rel.execute(sql).await.unwrap_err();
            assert_eq!(err.kind, QueryErrorKind::Rejected, "sql: {sql}");
        }
        // semicolons inside literals are fine
        let ok = rel
            .execute("SELECT COUNT(*) FROM ssh WHERE raw_message LIKE '%;%'")
            .await;
        assert!(ok.is_ok());
        let commented = rel.execute("-- busiest hosts\nSELECT host FROM ssh LIMIT 1").await;
        assert!(commented.is_ok());
    }

    #[tokio::test]
    async fn engine_refuses_writes_without_strict_mode() {
        let (_dir, rel) = sample_relation(RelationOptions {
            strict: false,
            ..RelationOptions::default()
        })
        .await;
        let err = rel.execute("DELETE FROM ssh").await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Engine);
        let count = rel.execute("SELECT COUNT(*) FROM ssh").await.unwrap();
        assert_eq!(count.rows[0][0].as_i64(), Some(14));
    }

    #[tokio::test]
    async fn rows_are_capped() {
        let (_dir, rel) = sample_relation(RelationOptions {
            max_rows: 3,
            ..RelationOptions::default()
        })
        .await;
        let result = rel.execute("SELECT line_number FROM ssh").await.unwrap();
        assert_eq!(result.row_count(), 3);
        assert!(result.truncated);
        assert!(result.to_csv().contains("# truncated to 3 rows"));
    }

    #[tokio::test]
    async fn runaway_query_times_out() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let sql = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                   SELECT COUNT(*) FROM c";
        let err = rel
            .execute_with_timeout(sql, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Timeout);

        // The connection is usable again once the interrupted statement unwinds.
        let mut recovered = false;
        for _ in 0..50 {
            if rel.execute("SELECT 1").await.is_ok() {
                recovered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(recovered);
    }

    #[tokio::test]
    async fn interrupt_skips_a_statement_that_already_finished() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        *lock_running(&rel.running) = 7;
        assert!(!rel.interrupt_if_running(6));
        assert!(rel.interrupt_if_running(7));
        *lock_running(&rel.running) = 0;
    }

    #[tokio::test]
    async fn timed_out_query_leaves_queued_query_alone() {
        let (_dir, rel) = sample_relation(RelationOptions::default()).await;
        let rel = Arc::new(rel);
        let runaway = tokio::spawn({
            let rel = rel.clone();
            async move {
                rel.execute_with_timeout(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                     SELECT COUNT(*) FROM c",
                    Duration::from_millis(150),
                )
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = rel
            .execute_with_timeout("SELECT COUNT(*) FROM ssh", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(runaway.await.unwrap().unwrap_err().kind, QueryErrorKind::Timeout);
        assert_eq!(queued.rows[0][0].as_i64(), Some(14));
    }

    #[tokio::test]
    async fn read_all_ignores_row_cap() {
        let (_dir, rel) = sample_relation(RelationOptions {
            max_rows: 2,
            ..RelationOptions::default()
        })
        .await;
        let result = rel.read_all("SELECT line_number FROM ssh").await.unwrap();
        assert_eq!(result.row_count(), 14);
        assert!(!result.truncated);
    }

    #[test]
    fn csv_quotes_special_fields() {
        let result = QueryResult {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![
                CellValue::Text("x,y".into()),
                CellValue::Text("say \"hi\"".into()),
            ]],
            truncated: false,
        };
        assert_eq!(result.to_csv(), "a,b\n\"x,y\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn null_renders_empty() {
        let result = QueryResult {
            columns: vec!["u".into(), "n".into()],
            rows: vec![vec![CellValue::Null, CellValue::Integer(3)]],
            truncated: false,
        };
        assert_eq!(result.to_csv(), "u,n\n,3\n");
    }
}
