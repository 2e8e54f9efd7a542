//! SSH authentication log parsing for sshq.
//!
//! Normalizes raw sshd/syslog lines into fixed-schema [`LogRecord`]s
//! (one record per non-blank line, never dropped), and provides a
//! `LogSource` abstraction so the table materializer can be tested
//! without touching the filesystem.

pub mod error;
pub mod mock;
pub mod parsers;
pub mod source;
pub mod types;

// Re-export key types for convenience
pub use error::{LogError, LogResult};
pub use mock::MockLogSource;
pub use parsers::{ParserConfig, parse_line, parse_lines};
pub use source::{FileLogSource, LogSource};
pub use types::{EventType, LogRecord, ParseOutput, ParseWarning, RawLine, WarningKind};
