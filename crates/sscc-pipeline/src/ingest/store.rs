//! Destination table access
//!
//! The pool goes through sqlx's `Any` driver so the connection string
//! decides between PostgreSQL, MySQL and SQLite at runtime.

use async_trait::async_trait;
use futures::FutureExt;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Connection};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{IngestError, InsertError};

/// Inserts one batch of codes atomically
#[async_trait]
pub trait BatchInserter: Send + Sync {
    /// Insert every code in order inside one transaction.
    ///
    /// Either all rows are committed or none are visible.
    async fn insert_batch(&self, codes: &[String]) -> Result<(), InsertError>;
}

/// SQL dialect selected by the connection string scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    MySql,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once(':')?.0.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Backend::Postgres),
            "mysql" | "mariadb" => Some(Backend::MySql),
            "sqlite" => Some(Backend::Sqlite),
            _ => None,
        }
    }

    fn placeholder(self) -> &'static str {
        match self {
            Backend::Postgres => "$1",
            Backend::MySql | Backend::Sqlite => "?",
        }
    }

    /// Insert binding only the code; the other columns are fixed literals
    pub fn insert_statement(self, table: &str) -> String {
        format!(
            "INSERT INTO {table} (code,status,createdBy,lastUpdatedBy) VALUES ({},100,'txm','txm')",
            self.placeholder()
        )
    }
}

/// SQL-backed code store
#[derive(Debug, Clone)]
pub struct SqlCodeStore {
    pool: AnyPool,
    table: String,
    insert_sql: String,
}

impl SqlCodeStore {
    /// Open the pool and ping one connection. Both failures are fatal.
    pub async fn connect(config: &DatabaseConfig, table: &str) -> Result<Self, IngestError> {
        let backend = Backend::from_url(&config.url).ok_or_else(|| {
            sqlx::Error::Configuration("unsupported database URL scheme".into())
        })?;

        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout)
            .connect(&config.url)
            .await?;

        pool.acquire().await?.ping().await?;

        info!(
            backend = ?backend,
            table,
            max_connections = config.max_connections,
            "Connected to database"
        );

        Ok(Self {
            pool,
            table: table.to_string(),
            insert_sql: backend.insert_statement(table),
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Total rows in the destination table
    pub async fn count_rows(&self) -> Result<u64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_in_transaction(&self, codes: &[String]) -> Result<(), InsertError> {
        let mut tx = self.pool.begin().await?;

        // sqlx prepares the statement once per connection and reuses it
        for code in codes {
            if let Err(err) = sqlx::query(&self.insert_sql)
                .bind(code.as_str())
                .execute(&mut *tx)
                .await
            {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback after failed insert also failed");
                }
                return Err(err.into());
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchInserter for SqlCodeStore {
    async fn insert_batch(&self, codes: &[String]) -> Result<(), InsertError> {
        guard_panics(self.insert_in_transaction(codes)).await
    }
}

/// Run an insert attempt, turning a panic inside it into
/// [`InsertError::Panicked`].
///
/// Unwinding drops any transaction the attempt still holds, which rolls
/// it back.
pub async fn guard_panics<F>(attempt: F) -> Result<(), InsertError>
where
    F: Future<Output = Result<(), InsertError>>,
{
    AssertUnwindSafe(attempt)
        .catch_unwind()
        .await
        .map_err(|payload| InsertError::Panicked(panic_message(payload.as_ref())))?
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
