//! Shared test harness for E2E integration tests.
//!
//! Wires a mock auth log through the real materializer, SQLite relation and
//! agent, with deterministic chat models standing in for Ollama.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use sq_agent::llm::{ChatMessage, ChatModel, ModelResult, ModelTurn, Role, ToolCall, ToolSpec};
use sq_agent::{QueryService, ServiceConfig};
use sq_log_tools::MockLogSource;
use sq_log_tools::mock::SAMPLE_AUTH_LOG;

/// Failed-login attempts per IP, repetitions included.
pub const TOP_IPS_SQL: &str = "SELECT ip_address, SUM(repetition_count) AS attempts FROM ssh \
WHERE event_type IN ('failed_login', 'failed_login_invalid_user') \
GROUP BY ip_address ORDER BY attempts DESC, ip_address LIMIT 5";

pub const COUNT_SQL: &str = "SELECT COUNT(*) AS total FROM ssh";

pub const TOP_USERS_SQL: &str = "SELECT username, COUNT(*) AS attempts FROM ssh \
WHERE username IS NOT NULL AND event_type <> 'accepted_login' \
GROUP BY username ORDER BY attempts DESC, username LIMIT 5";

/// End-to-end harness: a temp artifact directory plus the sample auth log.
pub struct TestHarness {
    pub dir: tempfile::TempDir,
    pub source: MockLogSource,
    pub config: ServiceConfig,
}

impl TestHarness {
    /// Harness serving `MockLogSource::with_auth_sample()` (14 lines, year 2024).
    pub fn with_auth_sample() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.data.log_path = SAMPLE_AUTH_LOG.into();
        config.data.table_path = dir.path().join("ssh-audit.sqlite");
        config.data.default_year = Some(2024);
        Self {
            dir,
            source: MockLogSource::with_auth_sample(),
            config,
        }
    }

    /// Start a service over the harness log with the given model.
    pub async fn start(&self, model: Arc<dyn ChatModel>) -> QueryService {
        QueryService::start_with_source(&self.config, &self.source, model)
            .await
            .unwrap()
    }
}

// ── Scripted model ────────────────────────────────────────────

/// Replays a fixed sequence of turns; answers "SUMMARY: done" when exhausted.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ModelResult<ModelTurn>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelResult<ModelTurn>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that calls `sql_query` with the same query forever.
    pub fn looping(query: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| sql(query)).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> ModelResult<ModelTurn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelTurn::Final("SUMMARY: done".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn sql(query: &str) -> ModelResult<ModelTurn> {
    Ok(ModelTurn::ToolCall(ToolCall {
        name: "sql_query".into(),
        arguments: json!({ "query": query }),
    }))
}

pub fn final_text(text: &str) -> ModelResult<ModelTurn> {
    Ok(ModelTurn::Final(text.into()))
}

// ── Analyst model ─────────────────────────────────────────────

/// A deterministic stand-in for a real model.
///
/// Picks a query from keywords in the question, then writes a conventional
/// answer whose findings are the rows of the last observation, in order.
pub struct AnalystModel;

impl AnalystModel {
    fn query_for(question: &str) -> &'static str {
        let q = question.to_lowercase();
        if q.contains("ip") {
            TOP_IPS_SQL
        } else if q.contains("username") {
            TOP_USERS_SQL
        } else {
            COUNT_SQL
        }
    }

    fn answer_from(csv: &str, sql: &str) -> String {
        let mut lines = csv.lines().filter(|l| !l.starts_with('#'));
        let header = lines.next().unwrap_or_default();
        let rows: Vec<&str> = lines.collect();
        let findings: Vec<String> = rows
            .iter()
            .map(|r| format!("- {}", r.replace(',', ": ")))
            .collect();
        let summary = match rows.first() {
            Some(first) if rows.len() == 1 && !header.contains(',') => {
                format!("The {header} is {first}.")
            }
            Some(first) => format!("{} rows; the first is {}.", rows.len(), first.replace(',', ": ")),
            None => "No rows matched.".to_string(),
        };
        format!("SUMMARY: {summary}\nFINDINGS:\n{}\nSQL: {sql}", findings.join("\n"))
    }
}

#[async_trait]
impl ChatModel for AnalystModel {
    async fn chat(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> ModelResult<ModelTurn> {
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let sql = Self::query_for(question);

        match messages.last() {
            Some(last) if last.role == Role::Tool => {
                Ok(ModelTurn::Final(Self::answer_from(&last.content, sql)))
            }
            _ => Ok(ModelTurn::ToolCall(ToolCall {
                name: "sql_query".into(),
                arguments: json!({ "query": sql }),
            })),
        }
    }

    fn model_name(&self) -> &str {
        "analyst"
    }
}

/// Render a query result the way `AnalystModel` writes findings.
pub fn rows_as_findings(result: &sq_table::QueryResult) -> Vec<String> {
    result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(": ")
        })
        .collect()
}
