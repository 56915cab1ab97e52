//! Post-load consistency check

use serde::{Deserialize, Serialize};
use sscc_common::FileSnapshot;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::store::SqlCodeStore;
use crate::error::IngestError;

/// Result of comparing the source file against the destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verification {
    /// File unchanged and every line has a row
    Passed { lines: u64, rows: u64 },
    /// The file's content changed after the pre-load snapshot
    Tampered { expected: String, actual: String },
    /// File unchanged but the table's total row count differs
    CountMismatch { file_lines: u64, table_rows: u64 },
}

impl Verification {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verification::Passed { .. })
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Passed { lines, rows } => {
                write!(f, "PASS: {lines} lines, {rows} rows")
            },
            Verification::Tampered { expected, actual } => {
                write!(f, "FAIL: source file changed during load (expected {expected}, found {actual})")
            },
            Verification::CountMismatch {
                file_lines,
                table_rows,
            } => {
                write!(f, "FAIL: {file_lines} lines in file but {table_rows} rows in table")
            },
        }
    }
}

/// Hash and count the source file off the async runtime
pub async fn capture_snapshot(path: &Path) -> Result<FileSnapshot, IngestError> {
    let path: PathBuf = path.to_path_buf();
    let snapshot = tokio::task::spawn_blocking(move || FileSnapshot::capture(&path)).await??;
    Ok(snapshot)
}

/// Re-snapshot `path` and compare it with `before`, then compare the line
/// count with the table's total row count.
///
/// A changed hash is reported as [`Verification::Tampered`] regardless of
/// the counts.
pub async fn verify(
    before: &FileSnapshot,
    path: &Path,
    store: &SqlCodeStore,
) -> Result<Verification, IngestError> {
    let after = capture_snapshot(path).await?;

    if let Err(mismatch) = before.ensure_unchanged(&after) {
        warn!(error = %mismatch, path = %path.display(), "Source file changed during ingestion");
        return Ok(Verification::Tampered {
            expected: before.hash.clone(),
            actual: after.hash,
        });
    }

    let rows = store.count_rows().await?;
    let lines = after.line_count;

    if rows > lines {
        warn!(
            rows,
            lines,
            table = store.table(),
            "Table holds more rows than the file has lines; it was probably not empty before the run"
        );
    }

    let outcome = if rows == lines {
        Verification::Passed { lines, rows }
    } else {
        Verification::CountMismatch {
            file_lines: lines,
            table_rows: rows,
        }
    };
    info!(%outcome, "Consistency check finished");
    Ok(outcome)
}
