//! SSH auth log parser.
//!
//! Every non-blank line becomes exactly one [`LogRecord`]. Prefix parsing
//! (timestamp, host, process, pid) and message classification are
//! independent: a bad timestamp never stops the message from being
//! classified, and an unrecognized message still keeps its prefix fields.

pub mod prefix;
pub mod sshd;

use chrono::{Datelike, Utc};
use serde::Deserialize;

use crate::types::{LogRecord, ParseOutput, ParseWarning, RawLine, WarningKind};

/// Storage format for timestamps in the materialized table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parser settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Year assumed for BSD syslog timestamps, which carry none.
    #[serde(default = "default_year")]
    pub default_year: i32,
}

fn default_year() -> i32 {
    Utc::now().year()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_year: default_year(),
        }
    }
}

impl ParserConfig {
    pub fn with_year(default_year: i32) -> Self {
        Self { default_year }
    }
}

/// Parse a single line into a record. Never fails.
pub fn parse_line(line: &str, line_number: usize, config: &ParserConfig) -> LogRecord {
    parse_with_warnings(line, line_number, config, &mut Vec::new())
}

/// Parse all non-blank lines, collecting per-line warnings.
pub fn parse_lines(lines: &[RawLine], config: &ParserConfig) -> ParseOutput {
    let mut output = ParseOutput::default();
    for line in lines.iter().filter(|l| !l.is_blank()) {
        if line.lossy {
            output.warnings.push(ParseWarning {
                line_number: line.number,
                kind: WarningKind::InvalidUtf8,
                message: "invalid UTF-8 replaced with U+FFFD".into(),
            });
        }
        let record = parse_with_warnings(&line.text, line.number, config, &mut output.warnings);
        output.records.push(record);
    }
    for warning in &output.warnings {
        tracing::debug!(
            line = warning.line_number,
            kind = ?warning.kind,
            message = %warning.message,
            "parse warning"
        );
    }
    output
}

fn parse_with_warnings(
    line: &str,
    line_number: usize,
    config: &ParserConfig,
    warnings: &mut Vec<ParseWarning>,
) -> LogRecord {
    let line = line.trim_end_matches(['\r', '\n']);
    let prefix = prefix::split(line, config.default_year);

    match (prefix.timestamp_token, prefix.timestamp) {
        (Some(token), None) => warnings.push(ParseWarning {
            line_number,
            kind: WarningKind::UnparsedTimestamp,
            message: format!("unparseable timestamp '{token}'"),
        }),
        _ if !prefix.recognized => warnings.push(ParseWarning {
            line_number,
            kind: WarningKind::UnrecognizedPrefix,
            message: "no syslog header found".into(),
        }),
        _ => {}
    }

    let class = sshd::classify(prefix.message);

    LogRecord {
        line_number,
        timestamp: prefix.timestamp,
        host: prefix.host.map(String::from),
        process: prefix.process.map(String::from),
        pid: prefix.pid,
        event_type: class.event_type,
        username: class.username,
        ip_address: class.ip_address,
        port: class.port,
        repetition_count: class.repetition_count,
        raw_message: line.to_string(),
    }
}
