//! SSCC Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Generates a range of GS1 SSCC-18 codes into a flat file and loads that
//! file into a relational table, then checks that file and table agree.
//!
//! # Pipelines
//!
//! - **Generation** ([`generate`]): range producer, encoding workers and a
//!   buffered file sink, connected by bounded queues
//! - **Ingestion** ([`ingest`]): batch reader and transactional insert
//!   workers with retry and a dead-letter log
//! - **Verification** ([`ingest::verify`]): content hash plus line/row count
//!
//! # Example
//!
//! ```no_run
//! use indicatif::ProgressBar;
//! use sscc_pipeline::config::Config;
//! use sscc_pipeline::ingest::{self, SqlCodeStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     sscc_pipeline::generate(&config.generate, ProgressBar::hidden()).await?;
//!
//!     let store = Arc::new(SqlCodeStore::connect(&config.database, &config.ingest.table).await?);
//!     let summary = ingest::ingest(&config.ingest, Arc::clone(&store), ProgressBar::hidden()).await?;
//!     let outcome = ingest::verify(&summary.snapshot, &config.ingest.input_file, &store).await?;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod progress;

pub use config::Config;
pub use error::{GenerateError, IngestError, InsertError};
pub use generate::{generate, GenerateSummary};
pub use ingest::{IngestSummary, Verification};
