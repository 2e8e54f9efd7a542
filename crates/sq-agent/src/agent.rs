//! Query-mediation agent: a bounded reason-act loop over one SQL tool.
//!
//! Each question runs in its own [`QuerySession`]:
//!
//! ```text
//! Start -> Reasoning -> { ToolCall -> Observing -> Reasoning }* -> Finish
//! ```
//!
//! Reasoning steps are capped by `max_iterations`. SQL errors are fed back
//! to the model as observations; only the step limit, a model failure, or a
//! query timeout end a session early, and those produce a degraded
//! [`AnswerRecord`] rather than an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use sq_table::{QueryErrorKind, QueryResult, QueryableRelation, SchemaDescription};

use crate::answer::{AnswerRecord, AnswerStatus, DegradeReason, ToolTrace, parse_answer};
use crate::llm::{ChatMessage, ChatModel, ModelError, ModelTurn, ToolCall, ToolSpec, tool_call_from_text};
use crate::prompt::{SQL_TOOL_NAME, build_system_prompt, sql_tool_spec};

/// Loop limits.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Maximum reasoning steps (model calls) per question.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-call model timeout in seconds.
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    /// Per-query SQL timeout in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Rows of the last result quoted as findings in a degraded answer.
    #[serde(default = "default_degraded_findings")]
    pub degraded_findings: usize,
}

fn default_max_iterations() -> u32 {
    8
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_query_timeout_secs() -> u64 {
    10
}
fn default_degraded_findings() -> usize {
    5
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            model_timeout_secs: default_model_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            degraded_findings: default_degraded_findings(),
        }
    }
}

/// Answers questions against one loaded relation.
///
/// Holds only shared, read-only state; any number of sessions may run
/// concurrently through `&self`.
pub struct QueryAgent {
    model: Arc<dyn ChatModel>,
    relation: Arc<QueryableRelation>,
    schema: Arc<SchemaDescription>,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    settings: AgentSettings,
}

impl QueryAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        relation: Arc<QueryableRelation>,
        schema: Arc<SchemaDescription>,
        instructions: &str,
        settings: AgentSettings,
    ) -> Self {
        let system_prompt = build_system_prompt(instructions, &schema);
        let tools = vec![sql_tool_spec(&schema.table)];
        Self {
            model,
            relation,
            schema,
            system_prompt,
            tools,
            settings,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Answer one question. Never fails; problems are reported in the record.
    pub async fn answer(&self, question: &str) -> AnswerRecord {
        QuerySession::new(self, question).run().await
    }
}

/// Where a session is in its loop.
enum Step {
    Reasoning,
    ToolCall(ToolCall),
    Finished(String),
    Degraded(DegradeReason),
}

/// Transient state for one question.
pub struct QuerySession<'a> {
    agent: &'a QueryAgent,
    question: String,
    transcript: Vec<ChatMessage>,
    traces: Vec<ToolTrace>,
    last_success: Option<(String, QueryResult)>,
    iterations: u32,
    started: Instant,
}

impl<'a> QuerySession<'a> {
    pub fn new(agent: &'a QueryAgent, question: &str) -> Self {
        let transcript = vec![
            ChatMessage::system(agent.system_prompt.clone()),
            ChatMessage::user(question),
        ];
        Self {
            agent,
            question: question.to_string(),
            transcript,
            traces: Vec::new(),
            last_success: None,
            iterations: 0,
            started: Instant::now(),
        }
    }

    /// Drive the loop to completion.
    pub async fn run(mut self) -> AnswerRecord {
        tracing::info!(question = %self.question, "session started");
        let mut step = Step::Reasoning;
        loop {
            step = match step {
                Step::Reasoning => self.reason().await,
                Step::ToolCall(call) => self.act(call).await,
                Step::Finished(text) => return self.finish(text),
                Step::Degraded(reason) => return self.degrade(reason),
            };
        }
    }

    async fn reason(&mut self) -> Step {
        if self.iterations >= self.agent.settings.max_iterations {
            return Step::Degraded(DegradeReason::IterationLimitExceeded);
        }
        self.iterations += 1;

        let timeout = Duration::from_secs(self.agent.settings.model_timeout_secs);
        let call = self.agent.model.chat(&self.transcript, &self.agent.tools);
        let turn = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(turn)) => turn,
            Ok(Err(ModelError::Timeout)) | Err(_) => {
                tracing::warn!(iteration = self.iterations, "model call timed out");
                return Step::Degraded(DegradeReason::ModelTimeout);
            }
            Ok(Err(e)) => {
                tracing::warn!(iteration = self.iterations, error = %e, "model call failed");
                return Step::Degraded(DegradeReason::ModelUnavailable);
            }
        };

        match turn {
            ModelTurn::ToolCall(call) => {
                self.transcript
                    .push(ChatMessage::assistant_tool_call(call.clone()));
                Step::ToolCall(call)
            }
            ModelTurn::Final(text) => {
                self.transcript.push(ChatMessage::assistant(text.clone()));
                match tool_call_from_text(&text) {
                    Some(call) => {
                        tracing::debug!(tool = %call.name, "tool call recovered from text");
                        Step::ToolCall(call)
                    }
                    None => Step::Finished(text),
                }
            }
        }
    }

    /// Execute a tool call and append the observation.
    async fn act(&mut self, call: ToolCall) -> Step {
        if call.name != SQL_TOOL_NAME {
            tracing::debug!(tool = %call.name, "model called unknown tool");
            self.transcript.push(ChatMessage::tool(format!(
                "Error: unknown tool '{}'. The only available tool is {SQL_TOOL_NAME}(query).",
                call.name
            )));
            return Step::Reasoning;
        }
        let Some(sql) = call.arguments.get("query").and_then(|q| q.as_str()) else {
            self.transcript.push(ChatMessage::tool(format!(
                "Error: {SQL_TOOL_NAME} requires a 'query' string argument."
            )));
            return Step::Reasoning;
        };
        let sql = sql.to_string();

        let timeout = Duration::from_secs(self.agent.settings.query_timeout_secs);
        let started = Instant::now();
        let outcome = self.agent.relation.execute_with_timeout(&sql, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (observation, step) = match outcome {
            Ok(result) => {
                tracing::info!(
                    iteration = self.iterations,
                    rows = result.row_count(),
                    truncated = result.truncated,
                    elapsed_ms,
                    sql = %sql,
                    "sql executed"
                );
                let observation = result.to_csv();
                self.traces.push(ToolTrace {
                    iteration: self.iterations,
                    sql: sql.clone(),
                    ok: true,
                    row_count: Some(result.row_count()),
                    error_kind: None,
                    observation: observation.clone(),
                    elapsed_ms,
                });
                self.last_success = Some((sql, result));
                (observation, Step::Reasoning)
            }
            Err(e) => {
                tracing::info!(
                    iteration = self.iterations,
                    kind = ?e.kind,
                    error = %e.message,
                    sql = %sql,
                    "sql failed"
                );
                let observation = format!("SQL error: {}", e.message);
                self.traces.push(ToolTrace {
                    iteration: self.iterations,
                    sql,
                    ok: false,
                    row_count: None,
                    error_kind: Some(e.kind),
                    observation: observation.clone(),
                    elapsed_ms,
                });
                let step = if e.kind == QueryErrorKind::Timeout {
                    Step::Degraded(DegradeReason::QueryTimeout)
                } else {
                    Step::Reasoning
                };
                (observation, step)
            }
        };

        self.transcript.push(ChatMessage::tool(observation));
        step
    }

    fn sql_executed(&self) -> String {
        self.last_success
            .as_ref()
            .map(|(sql, _)| sql.clone())
            .unwrap_or_default()
    }

    fn finish(self, text: String) -> AnswerRecord {
        let parsed = parse_answer(&text);
        if !parsed.format_ok {
            tracing::warn!(question = %self.question, "answer does not follow the SUMMARY/FINDINGS/SQL layout");
        }
        let record = AnswerRecord {
            question: self.question.clone(),
            status: AnswerStatus::Complete,
            summary: parsed.summary,
            findings: parsed.findings,
            sql_executed: self.sql_executed(),
            raw_answer: text,
            format_ok: parsed.format_ok,
            iterations: self.iterations,
            traces: self.traces,
            degraded_reason: None,
            model: self.agent.model_name().to_string(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            iterations = record.iterations,
            queries = record.traces.len(),
            format_ok = record.format_ok,
            elapsed_ms = record.elapsed_ms,
            "session complete"
        );
        record
    }

    fn degrade(self, reason: DegradeReason) -> AnswerRecord {
        let findings = self
            .last_success
            .as_ref()
            .map(|(_, result)| result_findings(result, self.agent.settings.degraded_findings))
            .unwrap_or_default();
        tracing::warn!(
            reason = %reason,
            iterations = self.iterations,
            queries = self.traces.len(),
            "session degraded"
        );
        AnswerRecord {
            question: self.question.clone(),
            status: AnswerStatus::Degraded,
            summary: reason.describe().to_string(),
            findings,
            sql_executed: self.sql_executed(),
            raw_answer: String::new(),
            format_ok: false,
            iterations: self.iterations,
            traces: self.traces,
            degraded_reason: Some(reason),
            model: self.agent.model_name().to_string(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Render the first `limit` rows as `column=value` findings.
fn result_findings(result: &QueryResult, limit: usize) -> Vec<String> {
    result
        .rows
        .iter()
        .take(limit)
        .map(|row| {
            result
                .columns
                .iter()
                .zip(row)
                .map(|(col, cell)| format!("{col}={cell}"))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect()
}
