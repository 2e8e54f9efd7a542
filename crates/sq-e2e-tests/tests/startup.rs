//! E2E tests for the startup barrier: materialize, load, describe.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{AnalystModel, TestHarness};
use sq_agent::QueryService;
use sq_log_tools::mock::SAMPLE_AUTH_LOG;

/// The first start builds the artifact; the second reuses it without reading the log.
#[tokio::test]
async fn e2e_startup_builds_then_reuses() {
    let h = TestHarness::with_auth_sample();

    let first = h.start(Arc::new(AnalystModel)).await;
    assert!(first.table().rebuilt);
    assert_eq!(first.table().row_count, 14);
    assert_eq!(h.source.read_count(), 1);

    let second = h.start(Arc::new(AnalystModel)).await;
    assert!(!second.table().rebuilt);
    assert_eq!(second.relation().row_count(), 14);
    assert_eq!(h.source.read_count(), 1);
}

/// A newer log mtime triggers a full rebuild even with identical content.
#[tokio::test]
async fn e2e_newer_log_triggers_rebuild() {
    let mut h = TestHarness::with_auth_sample();
    h.start(Arc::new(AnalystModel)).await;

    h.source.touch(SAMPLE_AUTH_LOG, Duration::from_secs(3600));
    let service = h.start(Arc::new(AnalystModel)).await;

    assert!(service.table().rebuilt);
    assert_eq!(h.source.read_count(), 2);
    assert_eq!(service.relation().row_count(), 14);
}

/// An unwritable artifact falls back to the previous one.
#[tokio::test]
async fn e2e_stale_artifact_fallback() {
    let mut h = TestHarness::with_auth_sample();
    h.start(Arc::new(AnalystModel)).await;

    let blocker = h.dir.path().join("ssh-audit.sqlite.tmp");
    std::fs::create_dir(&blocker).unwrap();
    std::fs::write(blocker.join("keep"), b"x").unwrap();
    h.source.touch(SAMPLE_AUTH_LOG, Duration::from_secs(3600));

    let service = h.start(Arc::new(AnalystModel)).await;
    assert!(service.is_stale());
    let record = service.answer("How many total log lines are there?").await;
    assert!(record.is_complete());
    assert!(record.summary.contains("14"));
}

/// Without a log there is nothing to serve.
#[tokio::test]
async fn e2e_missing_log_aborts_startup() {
    let mut h = TestHarness::with_auth_sample();
    h.config.data.log_path = "/var/log/missing.log".into();

    let result =
        QueryService::start_with_source(&h.config, &h.source, Arc::new(AnalystModel)).await;
    assert!(result.is_err());
    assert!(!h.config.data.table_path.exists());
}

/// Real files end to end: CRLF endings, invalid UTF-8 and blank lines.
#[tokio::test]
async fn e2e_file_log_source() {
    let h = TestHarness::with_auth_sample();
    let log = h.dir.path().join("auth.log");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(
        b"Jun 10 10:00:01 host sshd[1]: Failed password for root from 1.2.3.4 port 22 ssh2\r\n",
    );
    bytes.extend_from_slice(b"\n");
    bytes.extend_from_slice(b"Jun 10 10:00:02 host sshd[2]: Invalid user \xff\xfe from 5.6.7.8\n");
    bytes.extend_from_slice(b"Jun 10 10:00:03 host kernel: some unrelated message\n");
    std::fs::write(&log, bytes).unwrap();

    let mut config = h.config.clone();
    config.data.log_path = log.to_string_lossy().into_owned();
    config.data.table_path = h.dir.path().join("file.sqlite");

    let service = QueryService::start(&config, Arc::new(AnalystModel)).await.unwrap();
    assert_eq!(service.relation().row_count(), 3);
    assert_eq!(service.table().warning_count, 1);

    let result = service
        .relation()
        .execute("SELECT line_number, event_type, ip_address, raw_message FROM ssh ORDER BY line_number")
        .await
        .unwrap();
    assert_eq!(result.rows[0][1].as_str(), Some("failed_login"));
    assert_eq!(
        result.rows[0][3].as_str(),
        Some("Jun 10 10:00:01 host sshd[1]: Failed password for root from 1.2.3.4 port 22 ssh2")
    );
    assert_eq!(result.rows[1][0].as_i64(), Some(3));
    assert_eq!(result.rows[1][1].as_str(), Some("invalid_user"));
    assert_eq!(result.rows[1][2].as_str(), Some("5.6.7.8"));
    assert_eq!(result.rows[2][1].as_str(), Some("other"));
}

/// The schema description grounds the system prompt.
#[tokio::test]
async fn e2e_schema_grounds_prompt() {
    let h = TestHarness::with_auth_sample();
    let service = h.start(Arc::new(AnalystModel)).await;

    let schema = service.schema();
    assert_eq!(schema.table, "ssh");
    assert_eq!(schema.columns.len(), sq_table::COLUMNS.len());
    assert!(service.agent().system_prompt().contains(&schema.to_prompt_text()));
}

/// A prompt file replaces the built-in instructions.
#[tokio::test]
async fn e2e_system_prompt_file_override() {
    let mut h = TestHarness::with_auth_sample();
    let prompt = h.dir.path().join("system_prompt.txt");
    std::fs::write(&prompt, "You are a SOC analyst. Be brief.\n").unwrap();
    h.config.agent.system_prompt_path = Some(prompt);

    let service = h.start(Arc::new(AnalystModel)).await;
    assert!(
        service
            .agent()
            .system_prompt()
            .starts_with("You are a SOC analyst. Be brief.")
    );
}
