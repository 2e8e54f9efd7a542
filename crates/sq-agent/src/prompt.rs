//! System prompt assembly.

use std::path::Path;

use serde_json::json;
use sq_log_tools::EventType;
use sq_table::SchemaDescription;

use crate::llm::ToolSpec;

/// Name of the single tool the agent offers.
pub const SQL_TOOL_NAME: &str = "sql_query";

/// Instructions used when no prompt file is configured or it is unusable.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a precise, terse data assistant. Use the SQL tool when needed.";

const ANSWER_CONVENTION: &str = "\
When you have the answer, reply with exactly this layout and nothing else:
SUMMARY: <one or two sentences answering the question>
FINDINGS:
- <one finding per line, taken from the query results>
SQL: <the single query your answer is based on>";

/// Load instructions from `path`, falling back to [`DEFAULT_INSTRUCTIONS`]
/// if the file is missing, unreadable, or blank.
pub fn load_instructions(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_INSTRUCTIONS.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(contents) if !contents.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "loaded system prompt from file");
            contents.trim().to_string()
        }
        Ok(_) => {
            tracing::warn!(path = %path.display(), "system prompt file is empty; using default");
            DEFAULT_INSTRUCTIONS.to_string()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read system prompt file; using default");
            DEFAULT_INSTRUCTIONS.to_string()
        }
    }
}

/// Full system prompt: instructions, live schema, tool rules, answer layout.
pub fn build_system_prompt(instructions: &str, schema: &SchemaDescription) -> String {
    let event_types = EventType::ALL
        .iter()
        .map(|e| format!("'{}'", e.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{instructions}\n\n\
         You answer questions about SSH authentication logs stored in a SQLite table.\n\n\
         {schema_text}\n\
         event_type is one of: {event_types}.\n\
         Timestamps are TEXT in the form 'YYYY-MM-DD HH:MM:SS' (UTC); use SQLite date functions such as date(timestamp).\n\
         repetition_count holds how many times sshd collapsed an identical message; use SUM(repetition_count) to count attempts exactly.\n\n\
         Call the {SQL_TOOL_NAME} tool with a single read-only SELECT statement against table `{table}`. \
         Results come back as CSV (at most a few hundred rows). If the tool returns 'SQL error: ...', fix the query and try again. \
         Base every number you report on a query result.\n\n\
         {ANSWER_CONVENTION}",
        schema_text = schema.to_prompt_text(),
        table = schema.table,
    )
}

/// The `sql_query` function tool.
pub fn sql_tool_spec(table: &str) -> ToolSpec {
    ToolSpec {
        name: SQL_TOOL_NAME.to_string(),
        description: format!(
            "Execute one read-only SQL SELECT query against the `{table}` table and return the result as CSV with a header row."
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SQLite SELECT statement."
                }
            },
            "required": ["query"]
        }),
    }
}
