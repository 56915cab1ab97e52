//! Append-only log of codes from batches that exhausted their retries

use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Shared dead-letter file
///
/// Appends are serialised so lines from concurrent workers never interleave.
#[derive(Debug)]
pub struct DeadLetterLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line per code. Best effort: failures are logged and
    /// never interrupt the pipeline.
    ///
    /// Returns whether the codes reached the file.
    pub async fn append(&self, codes: &[String]) -> bool {
        let mut buf = String::with_capacity(codes.iter().map(|c| c.len() + 1).sum());
        for code in codes {
            buf.push_str(code);
            buf.push('\n');
        }

        let _guard = self.lock.lock().await;
        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(buf.as_bytes()).await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                warn!(
                    codes = codes.len(),
                    path = %self.path.display(),
                    "Batch dead-lettered"
                );
                true
            },
            Err(err) => {
                error!(
                    codes = codes.len(),
                    path = %self.path.display(),
                    error = %err,
                    "Failed to write dead-letter log, codes lost"
                );
                false
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_appends_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let log = DeadLetterLog::new(dir.path().join("failed.log"));

        assert!(log.append(&["a".to_string(), "b".to_string()]).await);
        assert!(log.append(&["c".to_string()]).await);

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(DeadLetterLog::new(dir.path().join("failed.log")));

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                let codes: Vec<String> = (0..50).map(|i| format!("{worker}-{i}")).collect();
                log.append(&codes).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 400);
        // Each worker's block is contiguous
        for block in lines.chunks(50) {
            let worker = block[0].split('-').next().unwrap();
            assert!(block.iter().all(|l| l.starts_with(&format!("{worker}-"))));
        }
    }

    #[tokio::test]
    async fn test_unwritable_path_is_not_fatal() {
        let log = DeadLetterLog::new("/nonexistent-dir/failed.log");
        assert!(!log.append(&["a".to_string()]).await);
    }
}
