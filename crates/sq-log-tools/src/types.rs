//! Core record types produced by the SSH log parser.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Event Type ────────────────────────────────────────────────

/// Category of an SSH log line, derived from its message shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FailedLogin,
    FailedLoginInvalidUser,
    AcceptedLogin,
    InvalidUser,
    PamAuthFailure,
    ConnectionClosed,
    Disconnect,
    Other,
}

impl EventType {
    /// All variants, in classification priority order.
    pub const ALL: [EventType; 8] = [
        Self::FailedLogin,
        Self::FailedLoginInvalidUser,
        Self::AcceptedLogin,
        Self::InvalidUser,
        Self::PamAuthFailure,
        Self::ConnectionClosed,
        Self::Disconnect,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailedLogin => "failed_login",
            Self::FailedLoginInvalidUser => "failed_login_invalid_user",
            Self::AcceptedLogin => "accepted_login",
            Self::InvalidUser => "invalid_user",
            Self::PamAuthFailure => "pam_auth_failure",
            Self::ConnectionClosed => "connection_closed",
            Self::Disconnect => "disconnect",
            Self::Other => "other",
        }
    }

    /// Inverse of [`EventType::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Raw Line ──────────────────────────────────────────────────

/// One line read from a log source, already decoded to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number in the source.
    pub number: usize,
    /// Decoded text without the trailing line terminator.
    pub text: String,
    /// True if invalid UTF-8 was replaced with U+FFFD while decoding.
    pub lossy: bool,
}

impl RawLine {
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            lossy: false,
        }
    }

    /// Number a sequence of already-decoded lines starting at 1.
    pub fn numbered<I, S>(lines: I) -> Vec<RawLine>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lines
            .into_iter()
            .enumerate()
            .map(|(i, l)| RawLine::new(i + 1, l))
            .collect()
    }

    /// Split a byte buffer into lines, replacing invalid UTF-8 sequences.
    pub fn decode_all(bytes: &[u8]) -> Vec<RawLine> {
        let mut lines: Vec<RawLine> = bytes
            .split(|b| *b == b'\n')
            .enumerate()
            .map(|(i, chunk)| {
                let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
                let decoded = String::from_utf8_lossy(chunk);
                let lossy = matches!(decoded, std::borrow::Cow::Owned(_));
                RawLine {
                    number: i + 1,
                    text: decoded.into_owned(),
                    lossy,
                }
            })
            .collect();
        // A trailing newline leaves one empty chunk behind
        if bytes.ends_with(b"\n") {
            lines.pop();
        }
        lines
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// ── Log Record ────────────────────────────────────────────────

/// A normalized SSH log line.
///
/// Field order is the column order of the materialized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// 1-based line number in the source log.
    pub line_number: usize,
    /// Parsed timestamp (None if the line had no parseable leading timestamp).
    pub timestamp: Option<NaiveDateTime>,
    pub host: Option<String>,
    pub process: Option<String>,
    pub pid: Option<u32>,
    pub event_type: EventType,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    /// How many times sshd said this message repeated (1 unless wrapped).
    pub repetition_count: u32,
    /// The full original line.
    pub raw_message: String,
}

impl LogRecord {
    /// A record carrying nothing but the raw line; fields are filled in by the parser.
    pub fn bare(line_number: usize, raw_message: impl Into<String>) -> Self {
        Self {
            line_number,
            timestamp: None,
            host: None,
            process: None,
            pid: None,
            event_type: EventType::Other,
            username: None,
            ip_address: None,
            port: None,
            repetition_count: 1,
            raw_message: raw_message.into(),
        }
    }

    /// Timestamp rendered the way it is stored in the table.
    pub fn timestamp_text(&self) -> Option<String> {
        self.timestamp
            .map(|ts| ts.format(crate::parsers::TIMESTAMP_FORMAT).to_string())
    }
}

// ── Parse Warnings ────────────────────────────────────────────

/// Kind of non-fatal problem found on a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    InvalidUtf8,
    UnparsedTimestamp,
    UnrecognizedPrefix,
}

/// A per-line diagnostic. Never aborts a parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub line_number: usize,
    pub kind: WarningKind,
    pub message: String,
}

/// Output of parsing a batch of lines.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub records: Vec<LogRecord>,
    pub warnings: Vec<ParseWarning>,
}

impl ParseOutput {
    /// Number of warnings of the given kind.
    pub fn warning_count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }
}
