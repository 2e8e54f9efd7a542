//! E2E tests: question in, grounded AnswerRecord out.

mod helpers;

use std::sync::Arc;

use helpers::{AnalystModel, COUNT_SQL, ScriptedModel, TOP_IPS_SQL, TestHarness, final_text, sql};
use sq_agent::AnswerStatus;

/// Re-running `sql_executed` reproduces the ordering reported in `findings`.
#[tokio::test]
async fn e2e_top_attackers_are_reproducible() {
    let h = TestHarness::with_auth_sample();
    let service = h.start(Arc::new(AnalystModel)).await;

    let record = service
        .answer("What are the top 5 attacking IP addresses?")
        .await;

    assert_eq!(record.status, AnswerStatus::Complete);
    assert!(record.format_ok);
    assert_eq!(record.sql_executed, TOP_IPS_SQL);

    let rerun = service.relation().execute(&record.sql_executed).await.unwrap();
    assert_eq!(record.findings, helpers::rows_as_findings(&rerun));
    assert_eq!(
        record.findings,
        vec!["203.0.113.10: 5", "192.0.2.44: 1", "198.51.100.7: 1"]
    );
}

/// "How many total log lines" is answered with COUNT(*) and the row count.
#[tokio::test]
async fn e2e_total_count_matches_row_count() {
    let h = TestHarness::with_auth_sample();
    let service = h.start(Arc::new(AnalystModel)).await;

    let record = service.answer("How many total log lines are there?").await;

    assert!(record.is_complete());
    assert_eq!(record.sql_executed, COUNT_SQL);
    let rows = service.relation().row_count();
    assert_eq!(rows, 14);
    assert!(
        record.summary.contains(&rows.to_string()),
        "summary should state the row count: {}",
        record.summary
    );
    assert_eq!(record.traces.len(), 1);
    assert_eq!(record.iterations, 2);
}

/// Username question goes through the same loop with a different query.
#[tokio::test]
async fn e2e_targeted_usernames() {
    let h = TestHarness::with_auth_sample();
    let service = h.start(Arc::new(AnalystModel)).await;

    let record = service
        .answer("Which usernames are being targeted most frequently?")
        .await;

    assert!(record.is_complete());
    assert_eq!(record.findings.first().map(String::as_str), Some("root: 4"));
}

/// A bad query is reported back to the model, which corrects itself.
#[tokio::test]
async fn e2e_self_correction_after_sql_error() {
    let h = TestHarness::with_auth_sample();
    let model = Arc::new(ScriptedModel::new(vec![
        sql("SELECT src_ip, COUNT(*) FROM ssh GROUP BY src_ip"),
        sql("SELECT ip_address, COUNT(*) AS n FROM ssh GROUP BY ip_address ORDER BY n DESC LIMIT 1"),
        final_text("SUMMARY: 203.0.113.10 appears most.\nFINDINGS:\n- 203.0.113.10: 6\nSQL: SELECT ip_address, COUNT(*) AS n FROM ssh GROUP BY ip_address ORDER BY n DESC LIMIT 1"),
    ]));
    let service = h.start(model.clone()).await;

    let record = service.answer("Which IP shows up most?").await;

    assert!(record.is_complete());
    assert_eq!(record.traces.len(), 2);
    assert!(!record.traces[0].ok);
    assert!(record.traces[0].observation.starts_with("SQL error: "));
    assert!(record.traces[0].observation.contains("src_ip"));
    assert!(record.traces[1].ok);
    assert_eq!(record.traces[1].row_count, Some(1));
    assert_eq!(
        record.sql_executed,
        "SELECT ip_address, COUNT(*) AS n FROM ssh GROUP BY ip_address ORDER BY n DESC LIMIT 1"
    );
    assert_eq!(model.calls(), 3);
}

/// Write attempts never reach the table, even when the model insists.
#[tokio::test]
async fn e2e_writes_are_rejected() {
    let h = TestHarness::with_auth_sample();
    let model = Arc::new(ScriptedModel::new(vec![
        sql("DELETE FROM ssh"),
        sql("DROP TABLE ssh"),
        final_text("SUMMARY: could not delete\nFINDINGS:\n- none"),
    ]));
    let service = h.start(model).await;

    let record = service.answer("delete everything").await;

    assert!(record.traces.iter().all(|t| !t.ok));
    assert_eq!(record.sql_executed, "");
    let count = service.relation().execute(COUNT_SQL).await.unwrap();
    assert_eq!(count.rows[0][0].as_i64(), Some(14));
}

/// Many questions at once on one service; sessions do not interfere.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_concurrent_sessions() {
    let h = TestHarness::with_auth_sample();
    let service = Arc::new(h.start(Arc::new(AnalystModel)).await);

    let questions = [
        "What are the top 5 attacking IP addresses?",
        "How many total login attempts were recorded?",
        "Which usernames are being targeted most frequently?",
    ];

    let mut handles = Vec::new();
    for i in 0..12 {
        let service = service.clone();
        let question = questions[i % questions.len()].to_string();
        handles.push(tokio::spawn(async move {
            (question.clone(), service.answer(&question).await)
        }));
    }

    for handle in handles {
        let (question, record) = handle.await.unwrap();
        assert_eq!(record.question, question);
        assert!(record.is_complete());
        assert_eq!(record.traces.len(), 1);
        if question.contains("IP") {
            assert_eq!(record.sql_executed, TOP_IPS_SQL);
            assert_eq!(record.findings[0], "203.0.113.10: 5");
        } else if question.contains("How many") {
            assert_eq!(record.sql_executed, COUNT_SQL);
        }
    }
}

/// Answer records serialize to the JSON written by `run-questions`.
#[tokio::test]
async fn e2e_answer_record_json() {
    let h = TestHarness::with_auth_sample();
    let service = h.start(Arc::new(AnalystModel)).await;

    let record = service.answer("How many total log lines are there?").await;
    let json = serde_json::to_value(&record).unwrap();

    assert_eq!(json["status"], "complete");
    assert_eq!(json["sql_executed"], COUNT_SQL);
    assert_eq!(json["format_ok"], true);
    assert_eq!(json["traces"][0]["ok"], true);
    assert!(json.get("degraded_reason").is_none());
}
