//! Dynamically typed SQLite values.

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use super::error::QueryError;

/// A single SQLite value, used both for parameters and results.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Real(_) => "REAL",
            Self::Text(_) => "TEXT",
            Self::Blob(_) => "BLOB",
        }
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SqlValue {
            fn from(value: $ty) -> Self {
                Self::Integer(i64::from(value))
            }
        })*
    };
}

from_integer!(i8, i16, i32, i64, u8, u16, u32, bool);

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Builds a parameter list from heterogeneous values.
///
/// ```rust,ignore
/// storage.execute("UPDATE karma SET score = ? WHERE nick = ?", &params![3, "alice"]).await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {{
        let empty: [$crate::storage::SqlValue; 0] = [];
        empty
    }};
    ($($value:expr),+ $(,)?) => {
        [$($crate::storage::SqlValue::from($value)),+]
    };
}

/// Conversion out of a [`SqlValue`].
pub trait FromSql: Sized {
    fn from_sql(value: &SqlValue) -> Result<Self, String>;
}

fn mismatch<T>(expected: &str, value: &SqlValue) -> Result<T, String> {
    Err(format!("expected {expected}, found {}", value.type_name()))
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromSql for i64 {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Integer(v) => Ok(*v),
            other => mismatch("INTEGER", other),
        }
    }
}

impl FromSql for i32 {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        let wide = i64::from_sql(value)?;
        i32::try_from(wide).map_err(|_| format!("{wide} does not fit in i32"))
    }
}

impl FromSql for u32 {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        let wide = i64::from_sql(value)?;
        u32::try_from(wide).map_err(|_| format!("{wide} does not fit in u32"))
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        i64::from_sql(value).map(|v| v != 0)
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => mismatch("REAL", other),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            other => mismatch("TEXT", other),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Blob(v) => Ok(v.clone()),
            SqlValue::Text(v) => Ok(v.clone().into_bytes()),
            other => mismatch("BLOB", other),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql(other).map(Some),
        }
    }
}

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds positional `?` parameters in order.
pub(crate) fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &'q [SqlValue]) -> SqliteQuery<'q> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Decodes every column of a row using the storage class of each value.
pub(crate) fn decode_row(row: &SqliteRow) -> Result<Vec<SqlValue>, QueryError> {
    (0..row.len()).map(|index| decode_column(row, index)).collect()
}

fn decode_column(row: &SqliteRow, index: usize) -> Result<SqlValue, QueryError> {
    let decode_error = |reason: String| QueryError::Decode {
        column: row.column(index).name().to_string(),
        reason,
    };

    let raw = row
        .try_get_raw(index)
        .map_err(|e| decode_error(e.to_string()))?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    let decoded = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).map(SqlValue::Integer),
        "REAL" => row.try_get::<f64, _>(index).map(SqlValue::Real),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(SqlValue::Blob),
        _ => row.try_get::<String, _>(index).map(SqlValue::Text),
    };
    decoded.map_err(|e| decode_error(e.to_string()))
}
