//! Native driver adapters.
//!
//! Each backend module knows how to build its pool, run a statement into a
//! [`RawResultSet`], decode its vendor types into JSON values and read its
//! catalog. Catalog lookups sit behind [`CatalogAdapter`] so callers never
//! branch on the database type.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use common::errors::EngineResult;
use common::models::{DbType, TableMetadata};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

use crate::connection::DriverConnection;

/// Column metadata as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub type_name: String,
    pub nullable: Option<bool>,
}

/// Undecorated result of a read statement.
#[derive(Debug, Clone, Default)]
pub struct RawResultSet {
    pub columns: Vec<RawColumn>,
    /// Row values in column order.
    pub rows: Vec<Vec<Value>>,
}

/// Row-reading limits for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    /// Stop reading after this many rows.
    pub max_rows: Option<usize>,
    /// Initial row buffer size.
    pub fetch_size: usize,
}

impl FetchLimits {
    pub(crate) fn reached(&self, rows: usize) -> bool {
        self.max_rows.is_some_and(|cap| rows >= cap)
    }

    pub(crate) fn initial_capacity(&self) -> usize {
        match self.max_rows {
            Some(cap) => self.fetch_size.min(cap),
            None => self.fetch_size,
        }
    }
}

/// Binds one JSON value as a positional parameter.
///
/// Arrays and objects are sent as their JSON text; NULL is sent as a typed
/// text NULL, so the PostgreSQL adapter inlines NULLs before binding.
pub(crate) fn bind_value<'q, DB>(
    query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    value: &Value,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
{
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => query.bind(value.to_string()),
    }
}

/// Vendor-specific catalog reads.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Base tables of `schema` (the connection's current schema when `None`),
    /// in catalog order.
    async fn list_tables(&self, conn: &mut DriverConnection, schema: Option<&str>) -> EngineResult<Vec<String>>;

    /// Columns, primary key and indexes of `table`. A missing table yields
    /// empty metadata.
    async fn table_metadata(&self, conn: &mut DriverConnection, table: &str) -> EngineResult<TableMetadata>;
}

/// Catalog adapter for `db_type`, if a native driver exists.
pub fn catalog_for(db_type: DbType) -> Option<&'static dyn CatalogAdapter> {
    match db_type {
        DbType::MySQL => Some(&mysql::MySqlCatalog),
        DbType::PostgreSQL => Some(&postgres::PgCatalog),
        DbType::SQLite => Some(&sqlite::SqliteCatalog),
        DbType::Oracle | DbType::SqlServer => None,
    }
}

/// Extracts the size from a declared type such as `VARCHAR(255)` or `DECIMAL(10,2)`.
pub(crate) fn declared_size(type_name: &str) -> Option<i64> {
    let start = type_name.find('(')?;
    let end = type_name[start..].find(')')? + start;
    type_name[start + 1..end].split(',').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_size() {
        assert_eq!(declared_size("VARCHAR(255)"), Some(255));
        assert_eq!(declared_size("DECIMAL(10, 2)"), Some(10));
        assert_eq!(declared_size("INTEGER"), None);
        assert_eq!(declared_size("CHAR()"), None);
    }

    #[test]
    fn test_fetch_limits() {
        let limits = FetchLimits {
            max_rows: Some(10),
            fetch_size: 1000,
        };
        assert_eq!(limits.initial_capacity(), 10);
        assert!(!limits.reached(9));
        assert!(limits.reached(10));
        let uncapped = FetchLimits {
            max_rows: None,
            fetch_size: 0,
        };
        assert!(!uncapped.reached(usize::MAX));
    }

    #[test]
    fn test_catalog_coverage() {
        assert!(catalog_for(DbType::SQLite).is_some());
        assert!(catalog_for(DbType::Oracle).is_none());
    }
}
