//! Storage error types.

use std::sync::Arc;

use thiserror::Error;

use crate::error::ConfigurationError;

/// A query failed. Returned to the calling handler as an ordinary result.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The statement failed to execute.
    #[error("query failed: {source} (statement: {statement})")]
    Execute {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// A result column could not be converted.
    #[error("cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },
}

impl QueryError {
    pub(crate) fn execute(statement: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |source| Self::Execute {
            statement: statement.to_string(),
            source,
        }
    }
}

/// A table could not be brought to its declared version.
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// One migration step failed. Earlier steps stay committed.
    #[error("migrating table '{table}' to version {version} failed: {source}")]
    Step {
        table: String,
        version: u32,
        #[source]
        source: Arc<sqlx::Error>,
    },

    /// The schema ledger could not be read.
    #[error("cannot read schema ledger for table '{table}': {source}")]
    Ledger {
        table: String,
        #[source]
        source: Arc<sqlx::Error>,
    },

    /// The database holds a newer schema than this build knows about.
    #[error("table '{table}' is at version {stored}, newer than the supported version {supported}")]
    NewerThanSupported {
        table: String,
        stored: u32,
        supported: u32,
    },
}

/// Any storage failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be opened or initialised.
    #[error("failed to open database '{location}': {source}")]
    Open {
        location: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
