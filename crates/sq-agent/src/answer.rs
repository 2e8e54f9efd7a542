//! Answer records and the answer-format convention.
//!
//! The model is asked to reply as:
//!
//! ```text
//! SUMMARY: <one or two sentences>
//! FINDINGS:
//! - <finding>
//! SQL: <the query used>
//! ```
//!
//! [`parse_answer`] turns that text into fields. Text that does not follow
//! the convention is still returned, with `format_ok = false`.

use serde::Serialize;
use sq_table::QueryErrorKind;

// ── Record ────────────────────────────────────────────────────

/// Whether the agent finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Complete,
    Degraded,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an answer is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    IterationLimitExceeded,
    ModelUnavailable,
    ModelTimeout,
    QueryTimeout,
}

impl DegradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IterationLimitExceeded => "iteration_limit_exceeded",
            Self::ModelUnavailable => "model_unavailable",
            Self::ModelTimeout => "model_timeout",
            Self::QueryTimeout => "query_timeout",
        }
    }

    /// Human-readable summary used as the degraded answer's summary.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::IterationLimitExceeded => {
                "The agent reached its reasoning step limit before producing a final answer."
            }
            Self::ModelUnavailable => "The language model could not be reached.",
            Self::ModelTimeout => "The language model did not respond in time.",
            Self::QueryTimeout => "A SQL query exceeded the execution timeout.",
        }
    }
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `sql_query` execution within a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolTrace {
    /// Reasoning step (1-based) that issued the call.
    pub iteration: u32,
    pub sql: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<QueryErrorKind>,
    /// Exactly what was fed back to the model.
    pub observation: String,
    pub elapsed_ms: u64,
}

/// The result of one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRecord {
    pub question: String,
    pub status: AnswerStatus,
    pub summary: String,
    pub findings: Vec<String>,
    /// Last SQL that executed successfully in the session, empty if none.
    pub sql_executed: String,
    /// Final model text, verbatim (empty when degraded before one arrived).
    pub raw_answer: String,
    pub format_ok: bool,
    pub iterations: u32,
    pub traces: Vec<ToolTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<DegradeReason>,
    pub model: String,
    pub elapsed_ms: u64,
}

impl AnswerRecord {
    pub fn is_complete(&self) -> bool {
        self.status == AnswerStatus::Complete
    }
}

// ── Convention parsing ────────────────────────────────────────

/// Fields recovered from a final answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub summary: String,
    pub findings: Vec<String>,
    pub format_ok: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Summary,
    Findings,
    Sql,
}

/// Parse a final answer following the SUMMARY / FINDINGS / SQL convention.
///
/// A missing `SUMMARY:` label is a soft mismatch: the summary falls back to
/// the first non-empty line and findings are left empty.
pub fn parse_answer(text: &str) -> ParsedAnswer {
    let mut section = Section::Preamble;
    let mut summary = Vec::new();
    let mut findings = Vec::new();
    let mut saw_summary = false;

    for line in text.lines() {
        let trimmed = strip_emphasis(line.trim());
        if let Some(rest) = label(trimmed, "SUMMARY:") {
            section = Section::Summary;
            saw_summary = true;
            push_nonempty(&mut summary, rest);
            continue;
        }
        if let Some(rest) = label(trimmed, "FINDINGS:") {
            section = Section::Findings;
            push_finding(&mut findings, rest);
            continue;
        }
        // The executed SQL is taken from the traces, not from the model's text.
        if label(trimmed, "SQL:").is_some() {
            section = Section::Sql;
            continue;
        }
        match section {
            Section::Preamble | Section::Sql => {}
            Section::Summary => push_nonempty(&mut summary, trimmed),
            Section::Findings => push_finding(&mut findings, trimmed),
        }
    }

    if !saw_summary {
        let first = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        return ParsedAnswer {
            summary: first.to_string(),
            findings: Vec::new(),
            format_ok: false,
        };
    }

    ParsedAnswer {
        summary: summary.join(" "),
        findings,
        format_ok: true,
    }
}

/// Case-insensitive label match at the start of a line.
fn label<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let head = line.get(..name.len())?;
    head.eq_ignore_ascii_case(name)
        .then(|| strip_emphasis(line[name.len()..].trim()))
}

/// Drop leading markdown bold markers models like to put around labels.
fn strip_emphasis(s: &str) -> &str {
    s.trim_start_matches('*').trim()
}

fn push_nonempty(out: &mut Vec<String>, s: &str) {
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

fn push_finding(out: &mut Vec<String>, s: &str) {
    let item = s
        .strip_prefix("- ")
        .or_else(|| s.strip_prefix("* "))
        .or_else(|| s.strip_prefix("• "))
        .unwrap_or(s)
        .trim();
    if !item.is_empty() && !item.eq_ignore_ascii_case("none") {
        out.push(item.to_string());
    }
}
