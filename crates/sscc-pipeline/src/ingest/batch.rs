//! Batch buffers and the batch reader
//!
//! Batches are drawn from a [`BatchPool`] free list and hand their buffer
//! back when dropped, so sustained ingestion reuses a bounded set of
//! allocations. A buffer is owned by exactly one stage at a time.

use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::IngestError;

/// Free list of reusable batch buffers
#[derive(Debug)]
pub struct BatchPool {
    batch_size: usize,
    max_idle: usize,
    free: Mutex<Vec<Vec<String>>>,
}

impl BatchPool {
    /// Pool of buffers holding up to `batch_size` codes; at most `max_idle`
    /// released buffers are retained.
    pub fn new(batch_size: usize, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            batch_size,
            max_idle,
            free: Mutex::new(Vec::with_capacity(max_idle)),
        })
    }

    /// Take an empty buffer, allocating only when the free list is empty
    pub fn acquire(self: &Arc<Self>, sequence: u64) -> PooledBatch {
        let codes = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.batch_size));

        PooledBatch {
            sequence,
            codes,
            pool: Arc::clone(self),
        }
    }

    /// Buffers currently waiting on the free list
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut codes: Vec<String>) {
        codes.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(codes);
        }
    }
}

/// A batch of codes borrowed from a [`BatchPool`]
#[derive(Debug)]
pub struct PooledBatch {
    sequence: u64,
    codes: Vec<String>,
    pool: Arc<BatchPool>,
}

impl PooledBatch {
    /// Zero-based position of this batch in the source file
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn push(&mut self, code: String) {
        self.codes.push(code);
    }

    pub fn is_full(&self) -> bool {
        self.codes.len() >= self.pool.batch_size
    }
}

impl Deref for PooledBatch {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.codes
    }
}

impl Drop for PooledBatch {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.codes));
    }
}

/// Stream `path` into full batches on `batches`, followed by one final
/// undersized batch for any remainder.
///
/// Returns the number of lines read. Stops early without error if every
/// consumer has gone away.
pub async fn read_batches(
    path: &Path,
    pool: &Arc<BatchPool>,
    batches: mpsc::Sender<PooledBatch>,
) -> Result<u64, IngestError> {
    let file = File::open(path)
        .await
        .map_err(|source| IngestError::OpenSource {
            path: path.to_path_buf(),
            source,
        })?;
    let mut lines = BufReader::new(file).lines();

    let mut lines_read = 0u64;
    let mut sequence = 0u64;
    let mut batch = pool.acquire(sequence);

    while let Some(line) = lines.next_line().await.map_err(IngestError::Read)? {
        lines_read += 1;
        batch.push(line);

        if batch.is_full() {
            sequence += 1;
            let full = std::mem::replace(&mut batch, pool.acquire(sequence));
            if batches.send(full).await.is_err() {
                warn!(lines_read, "No insertion workers left, reader stopping");
                return Ok(lines_read);
            }
        }
    }

    let batches_sent = if batch.is_empty() { sequence } else { sequence + 1 };
    if !batch.is_empty() && batches.send(batch).await.is_err() {
        warn!(lines_read, "No insertion workers left for the final batch");
    }

    debug!(lines_read, batches = batches_sent, "Source file fully read");
    Ok(lines_read)
}
