//! Ingestion pipeline
//!
//! ```text
//! source file ─▶ batch reader ─▶ batch queue ─▶ N insert workers ─▶ database
//!                                                     └─▶ dead-letter log
//! ```
//!
//! Each batch is inserted in its own transaction. A failing batch is retried
//! with a linear backoff and, once its attempts are used up, written to the
//! dead-letter log; it never stops the other workers. Only setup and read
//! failures are fatal.

pub mod batch;
pub mod dead_letter;
pub mod store;
pub mod verify;

pub use batch::{read_batches, BatchPool, PooledBatch};
pub use dead_letter::DeadLetterLog;
pub use store::{guard_panics, Backend, BatchInserter, SqlCodeStore};
pub use verify::{capture_snapshot, verify, Verification};

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use sscc_common::FileSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::IngestError;

/// Bounded retry with linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.retry_max,
            backoff_step: config.retry_backoff,
        }
    }

    /// Pause after failed attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

#[derive(Debug, Default)]
struct IngestStats {
    batches: AtomicU64,
    batches_committed: AtomicU64,
    batches_dead_lettered: AtomicU64,
    rows_committed: AtomicU64,
    attempts: AtomicU64,
}

/// Outcome of a load, before verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Source file state captured before the first batch was read
    pub snapshot: FileSnapshot,
    pub lines_read: u64,
    pub batches: u64,
    pub batches_committed: u64,
    pub batches_dead_lettered: u64,
    pub rows_committed: u64,
    pub attempts: u64,
}

impl IngestSummary {
    pub fn is_clean(&self) -> bool {
        self.batches_dead_lettered == 0
    }
}

/// Load the configured source file through `inserter`.
///
/// The source is snapshotted first so the caller can [`verify`] it once
/// this returns. Every worker has joined by the time the result is
/// available.
pub async fn ingest<I>(
    config: &IngestConfig,
    inserter: Arc<I>,
    progress: ProgressBar,
) -> Result<IngestSummary, IngestError>
where
    I: BatchInserter + 'static,
{
    let snapshot = capture_snapshot(&config.input_file).await?;
    info!(
        input = %config.input_file.display(),
        lines = snapshot.line_count,
        hash = %snapshot.hash,
        batch_size = config.batch_size,
        workers = config.workers,
        "Starting ingestion"
    );
    progress.set_length(snapshot.line_count);

    let policy = RetryPolicy::from_config(config);
    let dead_letter = Arc::new(DeadLetterLog::new(&config.dead_letter_file));
    let stats = Arc::new(IngestStats::default());
    // One buffer per worker plus the queued ones and the one being filled
    let pool = BatchPool::new(config.batch_size, config.workers * 2 + 1);

    let (batch_tx, batch_rx) = mpsc::channel::<PooledBatch>(config.workers);
    let batch_rx = Arc::new(Mutex::new(batch_rx));

    let mut workers = JoinSet::new();
    for worker in 0..config.workers {
        workers.spawn(insert_worker(
            worker,
            Arc::clone(&batch_rx),
            Arc::clone(&inserter),
            policy,
            Arc::clone(&dead_letter),
            Arc::clone(&stats),
            progress.clone(),
        ));
    }
    drop(batch_rx);

    // Dropping the sender inside read_batches closes the queue for the workers
    let read = read_batches(&config.input_file, &pool, batch_tx).await;

    while let Some(joined) = workers.join_next().await {
        joined?;
    }

    let lines_read = match read {
        Ok(lines) => lines,
        Err(err) => {
            progress.abandon();
            return Err(err);
        },
    };

    let summary = IngestSummary {
        snapshot,
        lines_read,
        batches: stats.batches.load(Ordering::Relaxed),
        batches_committed: stats.batches_committed.load(Ordering::Relaxed),
        batches_dead_lettered: stats.batches_dead_lettered.load(Ordering::Relaxed),
        rows_committed: stats.rows_committed.load(Ordering::Relaxed),
        attempts: stats.attempts.load(Ordering::Relaxed),
    };

    progress.finish();
    if summary.is_clean() {
        info!(
            rows = summary.rows_committed,
            batches = summary.batches,
            attempts = summary.attempts,
            "Ingestion finished"
        );
    } else {
        warn!(
            rows = summary.rows_committed,
            dead_lettered = summary.batches_dead_lettered,
            dead_letter_file = %dead_letter.path().display(),
            "Ingestion finished with dead-lettered batches"
        );
    }
    Ok(summary)
}

async fn insert_worker<I>(
    worker: usize,
    batches: Arc<Mutex<mpsc::Receiver<PooledBatch>>>,
    inserter: Arc<I>,
    policy: RetryPolicy,
    dead_letter: Arc<DeadLetterLog>,
    stats: Arc<IngestStats>,
    progress: ProgressBar,
) where
    I: BatchInserter + 'static,
{
    loop {
        let batch = {
            let mut rx = batches.lock().await;
            rx.recv().await
        };
        let Some(batch) = batch else {
            debug!(worker, "Batch queue drained, worker exiting");
            break;
        };

        stats.batches.fetch_add(1, Ordering::Relaxed);
        let rows = batch.len() as u64;

        if insert_with_retry(worker, &batch, inserter.as_ref(), policy, &stats).await {
            stats.batches_committed.fetch_add(1, Ordering::Relaxed);
            stats.rows_committed.fetch_add(rows, Ordering::Relaxed);
        } else {
            stats.batches_dead_lettered.fetch_add(1, Ordering::Relaxed);
            dead_letter.append(&batch).await;
        }
        progress.inc(rows);
    }
}

/// Returns whether any attempt committed
async fn insert_with_retry<I>(
    worker: usize,
    batch: &PooledBatch,
    inserter: &I,
    policy: RetryPolicy,
    stats: &IngestStats,
) -> bool
where
    I: BatchInserter + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        stats.attempts.fetch_add(1, Ordering::Relaxed);
        match inserter.insert_batch(batch).await {
            Ok(()) => return true,
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    worker,
                    batch = batch.sequence(),
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "Batch insert failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(err) => {
                warn!(
                    worker,
                    batch = batch.sequence(),
                    attempts = attempt,
                    error = %err,
                    "Batch insert failed on final attempt"
                );
            },
        }
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::InsertError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` calls, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl BatchInserter for Flaky {
        async fn insert_batch(&self, _codes: &[String]) -> Result<(), InsertError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(InsertError::Panicked(format!("induced failure {call}")))
            } else {
                Ok(())
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_step: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = policy(3);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_before_attempts_run_out() {
        let pool = BatchPool::new(2, 1);
        let mut batch = pool.acquire(0);
        batch.push("a".to_string());
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let stats = IngestStats::default();

        let started = tokio::time::Instant::now();
        assert!(insert_with_retry(0, &batch, &flaky, policy(3), &stats).await);
        assert_eq!(stats.attempts.load(Ordering::Relaxed), 3);
        // Slept 100ms then 200ms
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts_without_trailing_sleep() {
        let pool = BatchPool::new(2, 1);
        let batch = pool.acquire(0);
        let flaky = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let stats = IngestStats::default();

        let started = tokio::time::Instant::now();
        assert!(!insert_with_retry(0, &batch, &flaky, policy(3), &stats).await);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn test_summary_clean_only_without_dead_letters() {
        let mut summary = IngestSummary {
            snapshot: FileSnapshot {
                hash: String::new(),
                line_count: 0,
            },
            lines_read: 0,
            batches: 1,
            batches_committed: 1,
            batches_dead_lettered: 0,
            rows_committed: 0,
            attempts: 1,
        };
        assert!(summary.is_clean());
        summary.batches_dead_lettered = 1;
        assert!(!summary.is_clean());
    }
}
