//! Query results.

use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _};

use super::error::QueryError;
use super::value::{FromSql, SqlValue, decode_row};

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Decodes the value at `index`.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, QueryError> {
        let column = self
            .columns
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string());
        let value = self.values.get(index).ok_or_else(|| QueryError::Decode {
            column: column.clone(),
            reason: format!("row has only {} columns", self.values.len()),
        })?;
        T::from_sql(value).map_err(|reason| QueryError::Decode { column, reason })
    }

    /// Decodes the value of the column called `name`.
    pub fn get_named<T: FromSql>(&self, name: &str) -> Result<T, QueryError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| QueryError::Decode {
                column: name.to_string(),
                reason: "no such column".to_string(),
            })?;
        self.get(index)
    }

    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// A finite, single-pass sequence of rows.
#[derive(Debug)]
pub struct Rows {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Vec<SqlValue>>,
}

impl Rows {
    pub(crate) fn from_sqlite(rows: Vec<SqliteRow>) -> Result<Self, QueryError> {
        let columns: Arc<[String]> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            columns,
            rows: decoded.into_iter(),
        })
    }

    /// Column names. Empty when the query returned no rows.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next().map(|values| Row {
            columns: Arc::clone(&self.columns),
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Rows {}
