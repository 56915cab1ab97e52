//! Pipeline error types

use sscc_common::{EncodeError, SsccError};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors of the generation pipeline
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Failed to create output file {path:?}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode serial {serial}: {source}")]
    Encode {
        serial: u64,
        #[source]
        source: EncodeError,
    },

    #[error("Failed to write output file: {0}")]
    Write(#[source] std::io::Error),

    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Fatal errors of the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to open source file {path:?}: {source}")]
    OpenSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read source file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Integrity snapshot failed: {0}")]
    Snapshot(#[from] SsccError),

    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure of a single batch insert attempt
#[derive(Error, Debug)]
pub enum InsertError {
    #[error("Batch insert failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Batch insert panicked: {0}")]
    Panicked(String),
}
