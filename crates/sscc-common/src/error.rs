//! Error types shared by the SSCC crates

use thiserror::Error;

/// Result type alias for common SSCC operations
pub type Result<T> = std::result::Result<T, SsccError>;

/// Main error type for the shared primitives
#[derive(Error, Debug)]
pub enum SsccError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid serial range: start {start} is greater than end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}
