//! Generation pipeline
//!
//! ```text
//! producer ─▶ serial queue ─▶ N encoding workers ─▶ code queue ─▶ file sink
//! ```
//!
//! Both queues are bounded, so a slow sink throttles the encoders and the
//! encoders throttle the producer. Any fatal error goes through the
//! [`Coordinator`], which stops the producer and the workers at their next
//! iteration boundary; the sink drains whatever is already queued.

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use sscc_common::{sscc, SerialRange, Sscc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cancel::Coordinator;
use crate::config::GenerateConfig;
use crate::error::GenerateError;

/// How many written lines between progress bar updates
const PROGRESS_STRIDE: u64 = 4096;

/// Outcome of a successful generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSummary {
    pub serials: u64,
    pub lines_written: u64,
    pub workers: usize,
    pub elapsed_ms: u128,
}

/// Generate one SSCC per serial in the configured range into the output file.
///
/// Blocks until every stage has joined. Returns the first fatal error if
/// one was reported, in which case the output file may be truncated.
pub async fn generate(
    config: &GenerateConfig,
    progress: ProgressBar,
) -> Result<GenerateSummary, GenerateError> {
    let started = Instant::now();
    let file = File::create(&config.output_file).map_err(|source| GenerateError::CreateOutput {
        path: config.output_file.clone(),
        source,
    })?;

    info!(
        range = %config.range,
        serials = config.range.len(),
        workers = config.workers,
        output = %config.output_file.display(),
        "Starting SSCC generation"
    );
    progress.set_length(config.range.len());

    let (coordinator, watcher) = Coordinator::<GenerateError>::spawn();
    let (serial_tx, serial_rx) = mpsc::channel::<u64>(config.serial_queue);
    let (code_tx, code_rx) = mpsc::channel::<Sscc>(config.code_queue);

    let producer = tokio::spawn(produce_serials(
        config.range,
        serial_tx,
        coordinator.token().clone(),
    ));

    let serial_rx = Arc::new(Mutex::new(serial_rx));
    let mut workers = JoinSet::new();
    for worker in 0..config.workers {
        workers.spawn(encode_worker(
            worker,
            config.extension_digit.clone(),
            config.company_prefix.clone(),
            Arc::clone(&serial_rx),
            code_tx.clone(),
            coordinator.clone(),
        ));
    }
    // The sink's input closes once the last worker drops its sender
    drop(code_tx);
    drop(serial_rx);

    let sink = {
        let coordinator = coordinator.clone();
        let capacity = config.write_buffer_bytes;
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || write_codes(file, capacity, code_rx, coordinator, progress))
    };
    drop(coordinator);

    let produced = producer.await?;
    let mut encoded = 0u64;
    while let Some(result) = workers.join_next().await {
        encoded += result?;
    }
    let lines_written = sink.await?;

    if let Some(err) = watcher.await? {
        progress.abandon();
        return Err(err);
    }

    progress.finish();
    let summary = GenerateSummary {
        serials: config.range.len(),
        lines_written,
        workers: config.workers,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        produced,
        encoded,
        lines = summary.lines_written,
        elapsed_ms = summary.elapsed_ms as u64,
        "SSCC generation finished"
    );
    Ok(summary)
}

/// Emit every serial of the range in order; returns how many were queued
async fn produce_serials(
    range: SerialRange,
    serials: mpsc::Sender<u64>,
    token: CancellationToken,
) -> u64 {
    let mut queued = 0u64;
    for serial in range.iter() {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(queued, "Producer cancelled");
                break;
            }
            sent = serials.send(serial) => {
                if sent.is_err() {
                    debug!(queued, "Serial queue closed, producer stopping");
                    break;
                }
                queued += 1;
            }
        }
    }
    queued
}

/// Pull serials, encode them and forward the codes; returns how many were encoded
async fn encode_worker(
    worker: usize,
    extension_digit: String,
    company_prefix: String,
    serials: Arc<Mutex<mpsc::Receiver<u64>>>,
    codes: mpsc::Sender<Sscc>,
    coordinator: Coordinator<GenerateError>,
) -> u64 {
    let mut encoded = 0u64;
    loop {
        if coordinator.is_cancelled() {
            debug!(worker, encoded, "Encoding worker cancelled");
            break;
        }

        // Hold the lock only for a single receive
        let serial = {
            let mut rx = serials.lock().await;
            rx.recv().await
        };
        let Some(serial) = serial else {
            break;
        };

        match sscc::encode(&extension_digit, &company_prefix, serial) {
            Ok(code) => {
                if codes.send(code).await.is_err() {
                    debug!(worker, "Code queue closed, worker stopping");
                    break;
                }
                encoded += 1;
            },
            Err(source) => {
                error!(worker, serial, error = %source, "Encoding failed, worker stopping");
                coordinator.report(GenerateError::Encode { serial, source });
                break;
            },
        }
    }
    encoded
}

/// Single consumer writing one code per line; runs on the blocking pool
fn write_codes(
    file: File,
    capacity: usize,
    mut codes: mpsc::Receiver<Sscc>,
    coordinator: Coordinator<GenerateError>,
    progress: ProgressBar,
) -> u64 {
    let mut writer = BufWriter::with_capacity(capacity, file);
    let mut written = 0u64;

    while let Some(code) = codes.blocking_recv() {
        if let Err(err) = writer
            .write_all(code.as_str().as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
        {
            coordinator.report(GenerateError::Write(err));
            return written;
        }
        written += 1;
        if written % PROGRESS_STRIDE == 0 {
            progress.set_position(written);
        }
    }

    if let Err(err) = writer.flush() {
        coordinator.report(GenerateError::Write(err));
    }
    progress.set_position(written);
    written
}
