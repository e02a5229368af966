//! Multi-statement transactions.

use sprocket_core::{SuspendReason, suspend};
use sqlx::Sqlite;

use super::error::QueryError;
use super::rows::Rows;
use super::value::{SqlValue, bind_all};
use super::Executed;

/// An open transaction on one pooled connection.
///
/// Dropping a transaction that was not committed rolls it back.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl Transaction {
    pub(crate) fn new(tx: sqlx::Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Rows, QueryError> {
        let tx = &mut self.tx;
        suspend(SuspendReason::Query, async move {
            let rows = bind_all(sqlx::query(sql), params)
                .fetch_all(&mut **tx)
                .await
                .map_err(QueryError::execute(sql))?;
            Rows::from_sqlite(rows)
        })
        .await
    }

    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<Executed, QueryError> {
        let tx = &mut self.tx;
        suspend(SuspendReason::Query, async move {
            let done = bind_all(sqlx::query(sql), params)
                .execute(&mut **tx)
                .await
                .map_err(QueryError::execute(sql))?;
            Ok(Executed {
                rows_affected: done.rows_affected(),
                last_insert_id: done.last_insert_rowid(),
            })
        })
        .await
    }

    pub async fn commit(self) -> Result<(), QueryError> {
        suspend(SuspendReason::Query, self.tx.commit())
            .await
            .map_err(QueryError::execute("COMMIT"))
    }

    pub async fn rollback(self) -> Result<(), QueryError> {
        suspend(SuspendReason::Query, self.tx.rollback())
            .await
            .map_err(QueryError::execute("ROLLBACK"))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}
