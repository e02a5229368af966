//! SQLite storage shared by every plugin.
//!
//! A single [`Storage`] wraps an sqlx connection pool. Plugins declare the
//! tables they need with a [`TableDescriptor`]; [`Storage::register_table`]
//! brings each table up to its declared version and records progress in the
//! `schema_ledger` table.
//!
//! Every query is a suspension point: while the database works, the calling
//! task is reported as [`TaskState::Suspended`] with [`SuspendReason::Query`]
//! and other handlers keep running.
//!
//! [`TaskState::Suspended`]: sprocket_core::TaskState::Suspended

mod directory;
mod error;
mod migration;
mod rows;
mod transaction;
mod value;

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sprocket_core::{SuspendReason, suspend};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

pub use directory::{DIRECTORY_OWNER, Directory, Member};
pub use error::{MigrationError, QueryError, StorageError, StorageResult};
pub use migration::{LEDGER_TABLE, MigrationReport, MigrationStep, TableDescriptor};
pub use rows::{Row, Rows};
pub use transaction::Transaction;
pub use value::{FromSql, SqlValue};

use migration::TableClaim;
use value::bind_all;

// =============================================================================
// Configuration
// =============================================================================

/// Database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Upper bound on pooled connections for a file database.
    /// In-memory databases always use one connection.
    pub max_connections: u32,

    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 4,
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    /// Configuration for an on-disk database at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

struct StorageInner {
    pool: SqlitePool,
    location: String,
    claims: Mutex<HashMap<String, TableClaim>>,
    migrations: Arc<tokio::sync::Mutex<()>>,
}

/// Handle to the shared database. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Opens the database described by `config` and prepares the ledger.
    pub async fn open(config: &StorageConfig) -> StorageResult<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        let (location, options, pool_options) = match &config.path {
            None => {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(|source| StorageError::Open {
                        location: ":memory:".to_string(),
                        source,
                    })?;
                // Every in-memory connection is its own database, so the pool
                // must hold exactly one connection for its whole life.
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None);
                (":memory:".to_string(), options, pool)
            }
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
                (path.display().to_string(), options, pool)
            }
        };

        let options = options.busy_timeout(busy_timeout).foreign_keys(true);
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|source| StorageError::Open {
                location: location.clone(),
                source,
            })?;

        sqlx::query(migration::LEDGER_DDL)
            .execute(&pool)
            .await
            .map_err(|source| StorageError::Open {
                location: location.clone(),
                source,
            })?;

        info!(database = %location, "Storage opened");

        Ok(Self {
            inner: Arc::new(StorageInner {
                pool,
                location,
                claims: Mutex::new(HashMap::new()),
                migrations: Arc::new(tokio::sync::Mutex::new(())),
            }),
        })
    }

    /// Opens a private in-memory database.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::open(&StorageConfig::default()).await
    }

    /// Where the database lives, for logging.
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Runs a statement and collects its rows.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Rows, QueryError> {
        suspend(SuspendReason::Query, async {
            debug!(statement = sql, params = params.len(), "query");
            let rows = bind_all(sqlx::query(sql), params)
                .fetch_all(&self.inner.pool)
                .await
                .map_err(QueryError::execute(sql))?;
            Rows::from_sqlite(rows)
        })
        .await
    }

    /// Runs a statement and returns its first row, if any.
    pub async fn query_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Row>, QueryError> {
        Ok(self.query(sql, params).await?.next())
    }

    /// Runs a statement that returns no rows.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<Executed, QueryError> {
        suspend(SuspendReason::Query, async {
            debug!(statement = sql, params = params.len(), "execute");
            let done = bind_all(sqlx::query(sql), params)
                .execute(&self.inner.pool)
                .await
                .map_err(QueryError::execute(sql))?;
            Ok(Executed {
                rows_affected: done.rows_affected(),
                last_insert_id: done.last_insert_rowid(),
            })
        })
        .await
    }

    /// Starts a transaction. Dropping it without committing rolls back.
    pub async fn begin(&self) -> Result<Transaction, QueryError> {
        suspend(SuspendReason::Query, async {
            let tx = self
                .inner
                .pool
                .begin()
                .await
                .map_err(QueryError::execute("BEGIN"))?;
            Ok(Transaction::new(tx))
        })
        .await
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.inner.pool.close().await;
        info!(database = %self.inner.location, "Storage closed");
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("location", &self.inner.location)
            .field("tables", &self.inner.claims.lock().len())
            .finish()
    }
}
