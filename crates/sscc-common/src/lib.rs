//! SSCC Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared primitives for the SSCC generation and ingestion pipelines.
//!
//! # Overview
//!
//! - **Error Handling**: Common error and result types
//! - **SSCC**: Serial ranges and the GS1 SSCC-18 check-digit encoder
//! - **Checksums**: File integrity snapshots (SHA-256 + line count)
//! - **Logging**: Centralized `tracing` setup
//!
//! # Example
//!
//! ```
//! use sscc_common::sscc::encode;
//!
//! let code = encode("1", "1111110", 100_000_000).unwrap();
//! assert_eq!(code.as_str(), "111111101000000002");
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod sscc;

// Re-export commonly used types
pub use checksum::FileSnapshot;
pub use error::{Result, SsccError};
pub use sscc::{EncodeError, SerialRange, Sscc};
