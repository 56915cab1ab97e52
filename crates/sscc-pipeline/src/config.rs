//! Configuration management
//!
//! Every setting comes from the environment (a `.env` file is honoured)
//! and falls back to the `DEFAULT_*` constants below.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sscc_common::sscc::MAX_SERIAL;
use sscc_common::SerialRange;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Generation Defaults
// ============================================================================

/// Default SSCC extension digit.
pub const DEFAULT_EXTENSION_DIGIT: &str = "1";

/// Default GS1 company prefix (7 digits).
pub const DEFAULT_COMPANY_PREFIX: &str = "1111110";

/// Default first serial reference.
pub const DEFAULT_SERIAL_START: u64 = 100_000_000;

/// Default last serial reference (inclusive).
pub const DEFAULT_SERIAL_END: u64 = DEFAULT_SERIAL_START + 10_000 - 1;

/// Default path of the generated code file.
pub const DEFAULT_OUTPUT_FILE: &str = "/tmp/sscc.txt";

/// Default output buffer size (128 MiB).
pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 128 * 1024 * 1024;

/// Default capacity of the serial queue feeding the encoders.
pub const DEFAULT_SERIAL_QUEUE: usize = 500_000;

/// Default capacity of the code queue feeding the file sink.
pub const DEFAULT_CODE_QUEUE: usize = 100_000;

/// Encoding workers per logical core.
pub const ENCODE_WORKERS_PER_CORE: usize = 3;

// ============================================================================
// Ingestion Defaults
// ============================================================================

/// Default destination table.
pub const DEFAULT_TABLE: &str = "lc_sscc";

/// Default rows per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Default number of insertion workers.
pub const DEFAULT_INSERT_WORKERS: usize = 16;

/// Default attempts per batch before it is dead-lettered.
pub const DEFAULT_RETRY_MAX: u32 = 3;

/// Default linear backoff step in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Default dead-letter log, relative to the working directory.
pub const DEFAULT_DEAD_LETTER_FILE: &str = "failed.log";

// ============================================================================
// Database Defaults
// ============================================================================

/// Default connection string.
pub const DEFAULT_DATABASE_URL: &str = "mysql://username:passwd@db_host:3306/db_name";

/// Default connect/acquire timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum connection lifetime in seconds (30 minutes).
pub const DEFAULT_DATABASE_MAX_LIFETIME_SECS: u64 = 30 * 60;

/// Default idle timeout in seconds (5 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 5 * 60;

/// Full configuration for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub generate: GenerateConfig,
    pub ingest: IngestConfig,
    pub database: DatabaseConfig,
}

/// Generation pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    pub extension_digit: String,
    pub company_prefix: String,
    pub range: SerialRange,
    pub output_file: PathBuf,
    pub write_buffer_bytes: usize,
    pub serial_queue: usize,
    pub code_queue: usize,
    pub workers: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub input_file: PathBuf,
    pub table: String,
    pub batch_size: usize,
    pub workers: usize,
    pub retry_max: u32,
    pub retry_backoff: Duration,
    pub dead_letter_file: PathBuf,
}

/// Database pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

/// Parse an environment variable, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Encoding workers for this machine
pub fn default_encode_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * ENCODE_WORKERS_PER_CORE
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts `table` or `schema.table` made of ASCII alphanumerics and underscores
fn is_plain_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let start = env_or("SSCC_SERIAL_START", DEFAULT_SERIAL_START);
        let end = env_or("SSCC_SERIAL_END", DEFAULT_SERIAL_END);
        let range = SerialRange::new(start, end).context("Invalid SSCC_SERIAL_START/SSCC_SERIAL_END")?;
        let output_file = PathBuf::from(env_string_or("SSCC_OUTPUT_FILE", DEFAULT_OUTPUT_FILE));
        let insert_workers = env_or("SSCC_INSERT_WORKERS", DEFAULT_INSERT_WORKERS);

        let config = Config {
            generate: GenerateConfig {
                extension_digit: env_string_or("SSCC_EXTENSION_DIGIT", DEFAULT_EXTENSION_DIGIT),
                company_prefix: env_string_or("SSCC_COMPANY_PREFIX", DEFAULT_COMPANY_PREFIX),
                range,
                output_file: output_file.clone(),
                write_buffer_bytes: env_or("SSCC_WRITE_BUFFER_BYTES", DEFAULT_WRITE_BUFFER_BYTES),
                serial_queue: env_or("SSCC_SERIAL_QUEUE", DEFAULT_SERIAL_QUEUE),
                code_queue: env_or("SSCC_CODE_QUEUE", DEFAULT_CODE_QUEUE),
                workers: env_or("SSCC_ENCODE_WORKERS", default_encode_workers()),
            },
            ingest: IngestConfig {
                input_file: output_file,
                table: env_string_or("SSCC_TABLE", DEFAULT_TABLE),
                batch_size: env_or("SSCC_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                workers: insert_workers,
                retry_max: env_or("SSCC_RETRY_MAX", DEFAULT_RETRY_MAX),
                retry_backoff: Duration::from_millis(env_or(
                    "SSCC_RETRY_BACKOFF_MS",
                    DEFAULT_RETRY_BACKOFF_MS,
                )),
                dead_letter_file: PathBuf::from(env_string_or(
                    "SSCC_DEAD_LETTER_FILE",
                    DEFAULT_DEAD_LETTER_FILE,
                )),
            },
            database: DatabaseConfig {
                url: env_string_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                connect_timeout: Duration::from_secs(env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )),
                max_lifetime: Duration::from_secs(env_or(
                    "DATABASE_MAX_LIFETIME",
                    DEFAULT_DATABASE_MAX_LIFETIME_SECS,
                )),
                idle_timeout: Duration::from_secs(env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )),
                ..DatabaseConfig::for_workers(DEFAULT_DATABASE_URL, insert_workers)
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.generate.validate()?;
        self.ingest.validate()?;
        self.database.validate()?;

        if self.database.max_connections < self.ingest.workers as u32 {
            anyhow::bail!(
                "Database max_connections ({}) is below the insert worker count ({})",
                self.database.max_connections,
                self.ingest.workers
            );
        }

        Ok(())
    }
}

impl GenerateConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.extension_digit.len() != 1 || !is_digits(&self.extension_digit) {
            anyhow::bail!(
                "Extension digit must be a single decimal digit, got '{}'",
                self.extension_digit
            );
        }

        if self.company_prefix.len() != 7 || !is_digits(&self.company_prefix) {
            anyhow::bail!(
                "Company prefix must be exactly 7 decimal digits, got '{}'",
                self.company_prefix
            );
        }

        if self.range.end() > MAX_SERIAL {
            anyhow::bail!(
                "Serial range {} exceeds the 9-digit serial reference (max {})",
                self.range,
                MAX_SERIAL
            );
        }

        if self.serial_queue == 0 || self.code_queue == 0 {
            anyhow::bail!("Queue capacities must be greater than 0");
        }

        if self.workers == 0 {
            anyhow::bail!("Encoding worker count must be greater than 0");
        }

        if self.write_buffer_bytes == 0 {
            anyhow::bail!("Write buffer must be greater than 0 bytes");
        }

        Ok(())
    }
}

impl IngestConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_plain_identifier(&self.table) {
            anyhow::bail!("Table name '{}' is not a plain identifier", self.table);
        }

        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.workers == 0 {
            anyhow::bail!("Insert worker count must be greater than 0");
        }

        if self.retry_max == 0 {
            anyhow::bail!("Retry limit must allow at least one attempt");
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Pool sized for `workers` concurrent batch inserts: up to twice as many
    /// connections as workers, none kept warm beyond the idle timeout.
    pub fn for_workers(url: impl Into<String>, workers: usize) -> Self {
        Self {
            url: url.into(),
            max_connections: (workers as u32).saturating_mul(2),
            min_connections: 0,
            connect_timeout: Duration::from_secs(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            max_lifetime: Duration::from_secs(DEFAULT_DATABASE_MAX_LIFETIME_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.min_connections > self.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections,
                self.max_connections
            );
        }

        Ok(())
    }
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            extension_digit: DEFAULT_EXTENSION_DIGIT.to_string(),
            company_prefix: DEFAULT_COMPANY_PREFIX.to_string(),
            range: SerialRange::new(DEFAULT_SERIAL_START, DEFAULT_SERIAL_END)
                .unwrap_or_else(|_| unreachable!("default range is ordered")),
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            write_buffer_bytes: DEFAULT_WRITE_BUFFER_BYTES,
            serial_queue: DEFAULT_SERIAL_QUEUE,
            code_queue: DEFAULT_CODE_QUEUE,
            workers: default_encode_workers(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            table: DEFAULT_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_INSERT_WORKERS,
            retry_max: DEFAULT_RETRY_MAX,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            dead_letter_file: PathBuf::from(DEFAULT_DEAD_LETTER_FILE),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generate: GenerateConfig::default(),
            ingest: IngestConfig::default(),
            database: DatabaseConfig::for_workers(DEFAULT_DATABASE_URL, DEFAULT_INSERT_WORKERS),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generate.range.len(), 10_000);
        assert_eq!(config.ingest.batch_size, 200);
        assert_eq!(config.database.max_connections, 32);
    }

    #[test]
    fn test_rejects_bad_company_prefix() {
        let mut config = GenerateConfig::default();
        config.company_prefix = "11111".to_string();
        assert!(config.validate().is_err());
        config.company_prefix = "11111a0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_extension_digit() {
        let mut config = GenerateConfig::default();
        config.extension_digit = "12".to_string();
        assert!(config.validate().is_err());
        config.extension_digit = "x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_serial_overflow() {
        let mut config = GenerateConfig::default();
        config.range = SerialRange::new(999_999_990, 1_000_000_005).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_plain_identifier("lc_sscc"));
        assert!(is_plain_identifier("logistics.lc_sscc"));
        assert!(!is_plain_identifier("lc_sscc; DROP TABLE x"));
        assert!(!is_plain_identifier("a.b.c"));
        assert!(!is_plain_identifier("1table"));
        assert!(!is_plain_identifier(""));
    }

    #[test]
    fn test_pool_cannot_starve_workers() {
        let mut config = Config::default();
        config.database.max_connections = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = IngestConfig::default();
        config.retry_max = 0;
        assert!(config.validate().is_err());
    }
}
