//! Shared helpers for pipeline integration tests
//!
//! The destination table lives in a throwaway SQLite database reached
//! through the same `Any` driver used against MySQL or PostgreSQL.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use sscc_common::sscc::encode;
use sscc_pipeline::config::{DatabaseConfig, IngestConfig};
use sscc_pipeline::ingest::SqlCodeStore;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const TABLE: &str = "lc_sscc";

const CREATE_TABLE: &str = "CREATE TABLE lc_sscc (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    status INTEGER,
    createdBy TEXT,
    lastUpdatedBy TEXT
)";

/// Scratch directory holding the database, code file and dead-letter log
pub struct TestEnv {
    pub dir: TempDir,
    pub store: SqlCodeStore,
}

impl TestEnv {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("sscc.db").display());

        // SQLite allows one writer at a time
        let mut database = DatabaseConfig::for_workers(url, 1);
        database.max_connections = 1;
        database.connect_timeout = Duration::from_secs(10);

        let store = SqlCodeStore::connect(&database, TABLE)
            .await
            .expect("Failed to open SQLite database");
        sqlx::query(CREATE_TABLE)
            .execute(store.pool())
            .await
            .expect("Failed to create table");

        Self { dir, store }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Ingest settings pointing at this environment's scratch files
    pub fn ingest_config(&self, input_file: &Path, batch_size: usize, workers: usize) -> IngestConfig {
        IngestConfig {
            input_file: input_file.to_path_buf(),
            table: TABLE.to_string(),
            batch_size,
            workers,
            retry_max: 3,
            retry_backoff: Duration::from_millis(1),
            dead_letter_file: self.path("failed.log"),
        }
    }

    pub async fn row_count(&self) -> u64 {
        self.store.count_rows().await.expect("Failed to count rows")
    }
}

/// Valid codes for serials `start..start + count` under the default prefix
pub fn codes(start: u64, count: u64) -> Vec<String> {
    (start..start + count)
        .map(|serial| encode("1", "1111110", serial).unwrap().into_string())
        .collect()
}

/// Write one code per line, newline-terminated
pub fn write_codes(path: &Path, codes: &[String]) {
    let mut file = std::fs::File::create(path).expect("Failed to create code file");
    for code in codes {
        writeln!(file, "{code}").unwrap();
    }
    file.flush().unwrap();
}
