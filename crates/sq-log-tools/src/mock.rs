//! Mock log source for testing: serves pre-loaded log content.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use crate::error::{LogError, LogResult};
use crate::source::LogSource;
use crate::types::RawLine;

/// Path used by [`MockLogSource::with_auth_sample`].
pub const SAMPLE_AUTH_LOG: &str = "/var/log/auth.log";

struct MockFile {
    bytes: Vec<u8>,
    modified: SystemTime,
}

/// A mock log source that serves pre-loaded content by path.
///
/// Counts `read_lines` calls so tests can assert that a cached table was
/// reused without re-reading the log.
pub struct MockLogSource {
    files: HashMap<String, MockFile>,
    reads: AtomicUsize,
}

impl MockLogSource {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            reads: AtomicUsize::new(0),
        }
    }

    /// Add a file with the given lines, modified "now".
    pub fn add_file(&mut self, path: impl Into<String>, lines: Vec<String>) {
        let mut bytes = lines.join("\n").into_bytes();
        if !bytes.is_empty() {
            bytes.push(b'\n');
        }
        self.add_bytes(path, bytes);
    }

    /// Add a file with raw (possibly non-UTF-8) content.
    pub fn add_bytes(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(
            path.into(),
            MockFile {
                bytes,
                modified: SystemTime::now(),
            },
        );
    }

    /// Advance a file's modification time without changing its content.
    pub fn touch(&mut self, path: &str, by: Duration) {
        if let Some(file) = self.files.get_mut(path) {
            file.modified += by;
        }
    }

    /// Number of `read_lines` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Sample sshd auth log lines (14 lines, year-less BSD timestamps).
    pub fn auth_sample_lines() -> Vec<String> {
        vec![
            "Jun 10 10:00:01 bastion sshd[111]: Failed password for root from 203.0.113.10 port 22 ssh2".into(),
            "Jun 10 10:00:03 bastion sshd[111]: Failed password for root from 203.0.113.10 port 22 ssh2".into(),
            "Jun 10 10:00:05 bastion sshd[112]: Failed password for invalid user admin from 198.51.100.7 port 40112 ssh2".into(),
            "Jun 10 10:00:06 bastion sshd[112]: Invalid user admin from 198.51.100.7 port 40112".into(),
            "Jun 10 10:00:09 bastion sshd[111]: Failed password for root from 203.0.113.10 port 22 ssh2".into(),
            "Jun 10 10:00:10 bastion sshd[111]: Connection closed by 203.0.113.10 port 22 [preauth]".into(),
            "Jun 10 10:01:00 bastion sshd[120]: Accepted publickey for deploy from 10.0.0.5 port 60022 ssh2: ED25519 SHA256:Zm9v".into(),
            "Jun 10 10:01:30 bastion sshd[121]: pam_unix(sshd:auth): authentication failure; logname= uid=0 euid=0 tty=ssh ruser= rhost=192.0.2.44  user=ubuntu".into(),
            "Jun 10 10:01:31 bastion sshd[121]: Failed password for ubuntu from 192.0.2.44 port 51515 ssh2".into(),
            "Jun 10 10:02:00 bastion sshd[120]: Received disconnect from 10.0.0.5 port 60022:11: disconnected by user".into(),
            "Jun 10 10:02:00 bastion sshd[120]: Disconnected from user deploy 10.0.0.5 port 60022".into(),
            "Jun 10 10:02:05 bastion kernel: [ 1234.5678] eth0: link up".into(),
            "Jun 10 10:02:07 bastion sshd[130]: message repeated 2 times: [ Failed password for root from 203.0.113.10 port 22 ssh2]".into(),
            "Jun 10 10:03:00 bastion CRON[140]: pam_unix(cron:session): session opened for user root by (uid=0)".into(),
        ]
    }

    /// Create a mock serving [`MockLogSource::auth_sample_lines`] at [`SAMPLE_AUTH_LOG`].
    pub fn with_auth_sample() -> Self {
        let mut m = Self::new();
        m.add_file(SAMPLE_AUTH_LOG, Self::auth_sample_lines());
        m
    }
}

impl Default for MockLogSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    async fn read_lines(&self, path: &str) -> LogResult<Vec<RawLine>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(path)
            .map(|f| RawLine::decode_all(&f.bytes))
            .ok_or_else(|| LogError::NotFound(path.to_string()))
    }

    async fn modified(&self, path: &str) -> LogResult<SystemTime> {
        self.files
            .get(path)
            .map(|f| f.modified)
            .ok_or_else(|| LogError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}
