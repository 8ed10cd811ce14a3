//! SQLite adapter.
//!
//! SQLite types values per row rather than per column, so decoding goes by
//! the runtime storage class of each value.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::errors::{EngineError, EngineResult};
use common::models::{ColumnMetadata, IndexMetadata, TableMetadata};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::pool::PoolOptions;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use super::{bind_value, declared_size, CatalogAdapter, FetchLimits, RawColumn, RawResultSet};
use crate::config_validator::ResolvedSource;
use crate::connection::DriverConnection;

/// Builds a lazily connecting pool. Username and secret do not apply.
pub(crate) fn build_pool(source: &ResolvedSource) -> EngineResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&source.config.url).map_err(|e| {
        EngineError::configuration(format!("invalid sqlite url: {}", e)).with_source_id(&source.config.id)
    })?;

    let settings = &source.settings;
    Ok(PoolOptions::<Sqlite>::new()
        .min_connections(settings.min_size)
        .max_connections(settings.max_size)
        .acquire_timeout(settings.connection_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        .max_lifetime(Some(settings.max_lifetime))
        .connect_lazy_with(options))
}

pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[Value],
    limits: FetchLimits,
) -> Result<RawResultSet, sqlx::Error> {
    let statement = (&mut *conn).prepare(sql).await?;
    let columns = statement
        .columns()
        .iter()
        .map(|c| RawColumn {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
            nullable: None,
        })
        .collect();

    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }

    let mut rows = Vec::with_capacity(limits.initial_capacity());
    let mut stream = query.fetch(&mut *conn);
    while !limits.reached(rows.len()) {
        match stream.try_next().await? {
            Some(row) => rows.push(decode_row(&row)),
            None => break,
        }
    }
    Ok(RawResultSet { columns, rows })
}

pub(crate) async fn execute(conn: &mut SqliteConnection, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

/// VM instructions between deadline checks.
const PROGRESS_INTERVAL_OPS: i32 = 1_000;

/// `SQLITE_INTERRUPT`.
const INTERRUPTED: &str = "9";

/// Installs a progress handler that interrupts the running statement once
/// `timeout` has passed.
pub(crate) async fn arm_statement_timeout(conn: &mut SqliteConnection, timeout: Duration) -> Result<(), sqlx::Error> {
    let deadline = Instant::now() + timeout;
    conn.lock_handle()
        .await?
        .set_progress_handler(PROGRESS_INTERVAL_OPS, move || Instant::now() < deadline);
    Ok(())
}

pub(crate) async fn disarm_statement_timeout(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    conn.lock_handle().await?.remove_progress_handler();
    Ok(())
}

pub(crate) fn is_statement_timeout(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.code().as_deref() == Some(INTERRUPTED) || e.message().contains("interrupted"))
}

fn decode_row(row: &SqliteRow) -> Vec<Value> {
    (0..row.columns().len()).map(|index| decode_value(row, index)).collect()
}

fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match storage.as_str() {
        "INTEGER" | "INT" | "BIGINT" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get_unchecked::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn catalog_error(e: sqlx::Error) -> EngineError {
    EngineError::driver("sqlite catalog lookup failed", e)
}

/// Catalog reads through `sqlite_master` and the table-valued pragmas.
pub struct SqliteCatalog;

impl SqliteCatalog {
    fn connection<'c>(conn: &'c mut DriverConnection) -> EngineResult<&'c mut SqliteConnection> {
        match conn {
            DriverConnection::SQLite(c) => Ok(&mut **c),
            other => Err(EngineError::internal(format!(
                "sqlite catalog used with a {} connection",
                other.db_type()
            ))),
        }
    }
}

#[async_trait]
impl CatalogAdapter for SqliteCatalog {
    async fn list_tables(&self, conn: &mut DriverConnection, schema: Option<&str>) -> EngineResult<Vec<String>> {
        if let Some(schema) = schema {
            tracing::debug!(schema = %schema, "SQLite has no schemas; listing main database");
        }
        let conn = Self::connection(conn)?;
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(catalog_error))
            .collect()
    }

    async fn table_metadata(&self, conn: &mut DriverConnection, table: &str) -> EngineResult<TableMetadata> {
        let conn = Self::connection(conn)?;

        let column_rows = sqlx::query(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;

        let mut pk_columns: Vec<(i64, String, String)> = Vec::new();
        let mut raw_columns = Vec::with_capacity(column_rows.len());
        for row in &column_rows {
            let name: String = row.try_get("name").map_err(catalog_error)?;
            let type_name: String = row
                .try_get::<Option<String>, _>("type")
                .map_err(catalog_error)?
                .unwrap_or_default()
                .to_uppercase();
            let not_null: i64 = row.try_get("notnull").map_err(catalog_error)?;
            let default_value: Option<String> = row.try_get("dflt_value").map_err(catalog_error)?;
            let pk: i64 = row.try_get("pk").map_err(catalog_error)?;
            if pk > 0 {
                pk_columns.push((pk, name.clone(), type_name.clone()));
            }
            raw_columns.push((name, type_name, not_null != 0, default_value));
        }
        pk_columns.sort_by_key(|(position, _, _)| *position);

        // A lone INTEGER primary key aliases the rowid and is generated on insert.
        let rowid_alias = match pk_columns.as_slice() {
            [(_, name, type_name)] if type_name == "INTEGER" => Some(name.clone()),
            _ => None,
        };

        let columns = raw_columns
            .into_iter()
            .map(|(name, type_name, not_null, default_value)| {
                let auto_increment = rowid_alias.as_deref() == Some(name.as_str());
                ColumnMetadata {
                    size: declared_size(&type_name),
                    nullable: !not_null && !auto_increment,
                    name,
                    type_name,
                    default_value,
                    auto_increment,
                }
            })
            .collect();

        let index_rows = sqlx::query(
            r#"SELECT il.name AS index_name, ii.name AS column_name, il."unique" AS is_unique
               FROM pragma_index_list(?) AS il
               JOIN pragma_index_info(il.name) AS ii
               ORDER BY il.name, ii.seqno"#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;

        let indexes = index_rows
            .iter()
            .map(|row| {
                Ok(IndexMetadata {
                    name: row.try_get("index_name").map_err(catalog_error)?,
                    column: row.try_get("column_name").map_err(catalog_error)?,
                    unique: row.try_get::<i64, _>("is_unique").map_err(catalog_error)? != 0,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(TableMetadata {
            table_name: table.to_string(),
            columns,
            primary_keys: pk_columns.into_iter().map(|(_, name, _)| name).collect(),
            indexes,
        })
    }
}
