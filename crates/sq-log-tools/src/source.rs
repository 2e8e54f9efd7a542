//! Log source abstraction: read log data from files or in-memory mocks.

use async_trait::async_trait;
use std::time::SystemTime;

use crate::error::{LogError, LogResult};
use crate::types::RawLine;

/// Abstraction for reading raw log lines and their freshness.
///
/// The materializer only talks to this trait, so staleness checks and
/// rebuilds can be exercised without touching the filesystem.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Read every line of the given log, decoding invalid UTF-8 lossily.
    async fn read_lines(&self, path: &str) -> LogResult<Vec<RawLine>>;

    /// Last modification time of the given log.
    async fn modified(&self, path: &str) -> LogResult<SystemTime>;

    /// Check if a source path exists and is readable.
    async fn exists(&self, path: &str) -> bool;
}

/// Reads logs from the local filesystem.
pub struct FileLogSource;

fn map_io(path: &str, e: std::io::Error) -> LogError {
    if e.kind() == std::io::ErrorKind::NotFound {
        LogError::NotFound(path.to_string())
    } else {
        LogError::Io(format!("{path}: {e}"))
    }
}

#[async_trait]
impl LogSource for FileLogSource {
    async fn read_lines(&self, path: &str) -> LogResult<Vec<RawLine>> {
        let bytes = tokio::fs::read(path).await.map_err(|e| map_io(path, e))?;
        Ok(RawLine::decode_all(&bytes))
    }

    async fn modified(&self, path: &str) -> LogResult<SystemTime> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| map_io(path, e))?;
        meta.modified().map_err(|e| map_io(path, e))
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn file_read_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "one\ntwo\r\nthree\n").unwrap();
        let path = file.path().to_str().unwrap();

        let lines = FileLogSource.read_lines(path).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "two");
        assert!(FileLogSource.exists(path).await);
        assert!(FileLogSource.modified(path).await.is_ok());
    }

    #[tokio::test]
    async fn file_not_found() {
        let result = FileLogSource.read_lines("/nonexistent/auth.log").await;
        assert!(matches!(result, Err(LogError::NotFound(_))));
        let result = FileLogSource.modified("/nonexistent/auth.log").await;
        assert!(matches!(result, Err(LogError::NotFound(_))));
        assert!(!FileLogSource.exists("/nonexistent/auth.log").await);
    }
}
