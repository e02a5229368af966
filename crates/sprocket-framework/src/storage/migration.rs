//! Versioned table migrations.
//!
//! Each table carries an ordered list of steps numbered `1..=n`. The ledger
//! stores the highest applied version per table; registering a table applies
//! only the steps above it, each in its own transaction together with the
//! ledger update. A failed step leaves earlier steps committed and the ledger
//! pointing at the last one that succeeded.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{error, info};

use super::error::{MigrationError, StorageResult};
use super::Storage;
use crate::error::ConfigurationError;

/// Name of the table that records applied versions.
pub const LEDGER_TABLE: &str = "schema_ledger";

pub(crate) const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_ledger (\
    name TEXT PRIMARY KEY NOT NULL, \
    version INTEGER NOT NULL)";

const LEDGER_UPSERT: &str = "INSERT INTO schema_ledger (name, version) VALUES (?, ?) \
    ON CONFLICT(name) DO UPDATE SET version = excluded.version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub version: u32,
    pub sql: Cow<'static, str>,
}

/// A table and the steps that build it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    steps: Vec<MigrationStep>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a migration step. Steps may hold several statements.
    pub fn step(mut self, version: u32, sql: impl Into<Cow<'static, str>>) -> Self {
        self.steps.push(MigrationStep {
            version,
            sql: sql.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// The version the table reaches once every step is applied.
    pub fn version(&self) -> u32 {
        self.steps.last().map_or(0, |s| s.version)
    }

    /// Checks the name and that versions run `1, 2, ..., n`.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let name = self.name.as_str();
        let is_identifier = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_identifier {
            return Err(ConfigurationError::invalid_table(
                name,
                "table name must be a plain SQL identifier",
            ));
        }
        if name.eq_ignore_ascii_case(LEDGER_TABLE) {
            return Err(ConfigurationError::invalid_table(name, "name is reserved"));
        }
        for (expected, step) in (1..).zip(&self.steps) {
            if step.version != expected {
                return Err(ConfigurationError::invalid_table(
                    name,
                    format!("expected step version {expected}, found {}", step.version),
                ));
            }
            if step.sql.trim().is_empty() {
                return Err(ConfigurationError::invalid_table(
                    name,
                    format!("step {expected} is empty"),
                ));
            }
        }
        Ok(())
    }
}

/// What [`Storage::register_table`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: String,
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TableClaim {
    owners: Vec<String>,
    descriptor: TableDescriptor,
}

impl Storage {
    /// Brings `table` up to its declared version on behalf of `owner`.
    ///
    /// The same descriptor may be registered by several owners; a different
    /// schema under a name another owner holds is rejected. The returned
    /// future owns its arguments, so it can be awaited from any `Send`
    /// context, including plugin `init`.
    pub fn register_table(
        &self,
        owner: &str,
        table: &TableDescriptor,
    ) -> impl Future<Output = StorageResult<MigrationReport>> + Send + 'static {
        migrate(self.clone(), owner.to_string(), table.clone())
    }

    fn check_claim(&self, owner: &str, table: &TableDescriptor) -> Result<(), ConfigurationError> {
        let claims = self.inner.claims.lock();
        let Some(claim) = claims.get(table.name()) else {
            return Ok(());
        };
        if claim.descriptor == *table {
            return Ok(());
        }
        match claim.owners.iter().find(|o| *o != owner) {
            Some(holder) => Err(ConfigurationError::TableConflict {
                table: table.name().to_string(),
                owner: holder.clone(),
                requested_by: owner.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn claim(&self, owner: String, table: TableDescriptor) {
        let mut claims = self.inner.claims.lock();
        let claim = claims
            .entry(table.name().to_string())
            .or_insert_with(|| TableClaim {
                owners: Vec::new(),
                descriptor: table.clone(),
            });
        claim.descriptor = table;
        if !claim.owners.contains(&owner) {
            claim.owners.push(owner);
        }
    }

    /// The version recorded in the ledger, or 0 for an unknown table.
    pub async fn table_version(&self, table: &str) -> Result<u32, MigrationError> {
        stored_version(self.inner.pool.clone(), table.to_string()).await
    }

    /// Drops every claim held by `owner`, returning the table names.
    ///
    /// Tables and their data stay in the database. A table shared with
    /// another owner stays claimed by it.
    pub fn release_tables(&self, owner: &str) -> Vec<String> {
        let mut claims = self.inner.claims.lock();
        let mut released = Vec::new();
        claims.retain(|name, claim| {
            let before = claim.owners.len();
            claim.owners.retain(|o| o != owner);
            if claim.owners.len() != before {
                released.push(name.clone());
            }
            !claim.owners.is_empty()
        });
        released.sort();
        released
    }

    /// Registered tables with the owners holding them, sorted by name.
    pub fn tables(&self) -> Vec<(String, Vec<String>)> {
        let mut tables: Vec<_> = self
            .inner
            .claims
            .lock()
            .iter()
            .map(|(name, claim)| (name.clone(), claim.owners.clone()))
            .collect();
        tables.sort();
        tables
    }
}

async fn migrate(
    storage: Storage,
    owner: String,
    table: TableDescriptor,
) -> StorageResult<MigrationReport> {
    table.validate()?;
    storage.check_claim(&owner, &table)?;

    let serial = Arc::clone(&storage.inner.migrations).lock_owned().await;
    // Another registration may have landed while we waited.
    storage.check_claim(&owner, &table)?;

    let name = table.name().to_string();
    let pool = storage.inner.pool.clone();
    let stored = stored_version(pool.clone(), name.clone()).await?;
    let supported = table.version();
    if stored > supported {
        return Err(MigrationError::NewerThanSupported {
            table: name,
            stored,
            supported,
        }
        .into());
    }

    let pending: Vec<MigrationStep> = table
        .steps()
        .iter()
        .filter(|s| s.version > stored)
        .cloned()
        .collect();
    let mut applied = Vec::with_capacity(pending.len());
    for step in pending {
        let version = step.version;
        if let Err(source) = apply_step(pool.clone(), name.clone(), step).await {
            error!(table = %name, version, error = %source, "Migration step failed");
            return Err(MigrationError::Step {
                table: name,
                version,
                source: Arc::new(source),
            }
            .into());
        }
        applied.push(version);
    }

    if !applied.is_empty() {
        info!(
            table = %name,
            owner = %owner,
            from = stored,
            to = supported,
            "Table migrated"
        );
    }

    storage.claim(owner, table);
    drop(serial);

    Ok(MigrationReport {
        table: name,
        from_version: stored,
        to_version: supported.max(stored),
        applied,
    })
}

async fn apply_step(pool: SqlitePool, table: String, step: MigrationStep) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(step.sql.as_ref())).await?;
    sqlx::query(LEDGER_UPSERT)
        .bind(table)
        .bind(i64::from(step.version))
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

async fn stored_version(pool: SqlitePool, table: String) -> Result<u32, MigrationError> {
    let fetched: Result<Option<i64>, sqlx::Error> =
        sqlx::query_scalar("SELECT version FROM schema_ledger WHERE name = ?")
            .bind(table.clone())
            .fetch_optional(&pool)
            .await;
    let source = match fetched {
        Ok(None) => return Ok(0),
        Ok(Some(v)) => match u32::try_from(v) {
            Ok(version) => return Ok(version),
            Err(_) => sqlx::Error::Decode(format!("version {v} is out of range").into()),
        },
        Err(source) => source,
    };
    Err(MigrationError::Ledger {
        table,
        source: Arc::new(source),
    })
}
