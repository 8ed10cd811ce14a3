//! MySQL adapter.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use common::errors::{EngineError, EngineResult};
use common::models::{ColumnMetadata, IndexMetadata, TableMetadata};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlPool, MySqlRow};
use sqlx::pool::PoolOptions;
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};

use super::{bind_value, CatalogAdapter, FetchLimits, RawColumn, RawResultSet};
use crate::config_validator::ResolvedSource;
use crate::connection::DriverConnection;

pub(crate) fn build_pool(source: &ResolvedSource) -> EngineResult<MySqlPool> {
    let config = &source.config;
    let options = MySqlConnectOptions::from_str(&config.url)
        .map_err(|e| EngineError::configuration(format!("invalid mysql url: {}", e)).with_source_id(&config.id))?
        .username(&config.username)
        .password(&config.secret);

    let settings = &source.settings;
    Ok(PoolOptions::<MySql>::new()
        .min_connections(settings.min_size)
        .max_connections(settings.max_size)
        .acquire_timeout(settings.connection_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        .max_lifetime(Some(settings.max_lifetime))
        .connect_lazy_with(options))
}

pub(crate) async fn fetch(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[Value],
    limits: FetchLimits,
) -> Result<RawResultSet, sqlx::Error> {
    // MySQL reports column nullability in the prepare response.
    let describe = (&mut *conn).describe(sql).await?;
    let columns = describe
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| RawColumn {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
            nullable: describe.nullable(i),
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

pub(crate) async fn execute(conn: &mut MySqlConnection, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

/// `ER_QUERY_TIMEOUT`.
const QUERY_TIMEOUT_ERROR: u16 = 3024;

/// Sets the session's `max_execution_time`. The server only enforces it on
/// `SELECT`; writes are bounded by the client-side wait alone.
pub(crate) async fn arm_statement_timeout(conn: &mut MySqlConnection, timeout: Duration) -> Result<(), sqlx::Error> {
    let sql = format!("SET SESSION max_execution_time = {}", timeout.as_millis().max(1));
    (&mut *conn).execute(sql.as_str()).await?;
    Ok(())
}

pub(crate) async fn disarm_statement_timeout(conn: &mut MySqlConnection) -> Result<(), sqlx::Error> {
    (&mut *conn).execute("SET SESSION max_execution_time = 0").await?;
    Ok(())
}

pub(crate) fn is_statement_timeout(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.try_downcast_ref::<MySqlDatabaseError>())
        .is_some_and(|e| e.number() == QUERY_TIMEOUT_ERROR)
}

fn decode_row(row: &MySqlRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(_) => decode_by_type(row, index, column.type_info().name()),
            Err(_) => Value::Null,
        })
        .collect()
}

fn decode_by_type(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOLEAN" | "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool).unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),

        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "INTEGER UNSIGNED" | "BIGINT UNSIGNED" => row
            .try_get_unchecked::<u64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),

        "FLOAT" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::from(f64::from(v)))
            .unwrap_or(Value::Null),

        "DOUBLE" | "DOUBLE PRECISION" | "REAL" => row.try_get::<f64, _>(index).map(Value::from).unwrap_or(Value::Null),

        // Decimals keep their exact text form.
        "DECIMAL" | "NUMERIC" | "DEC" | "FIXED" => row
            .try_get::<Decimal, _>(index)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),

        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),

        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),

        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|dt| Value::String(dt.to_string()))
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null),

        "JSON" => row.try_get::<Value, _>(index).unwrap_or(Value::Null),

        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn catalog_error(e: sqlx::Error) -> EngineError {
    EngineError::driver("mysql catalog lookup failed", e)
}

/// Catalog reads through `information_schema`.
pub struct MySqlCatalog;

impl MySqlCatalog {
    fn connection<'c>(conn: &'c mut DriverConnection) -> EngineResult<&'c mut MySqlConnection> {
        match conn {
            DriverConnection::MySQL(c) => Ok(&mut **c),
            other => Err(EngineError::internal(format!(
                "mysql catalog used with a {} connection",
                other.db_type()
            ))),
        }
    }
}

#[async_trait]
impl CatalogAdapter for MySqlCatalog {
    async fn list_tables(&self, conn: &mut DriverConnection, schema: Option<&str>) -> EngineResult<Vec<String>> {
        let conn = Self::connection(conn)?;
        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) AS table_name
             FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_TYPE = 'BASE TABLE'
             ORDER BY TABLE_NAME",
        )
        .bind(schema)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("table_name").map_err(catalog_error))
            .collect()
    }

    async fn table_metadata(&self, conn: &mut DriverConnection, table: &str) -> EngineResult<TableMetadata> {
        let conn = Self::connection(conn)?;

        let column_rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
                    CAST(UPPER(DATA_TYPE) AS CHAR) AS type_name,
                    CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION) AS SIGNED) AS size,
                    CAST(IS_NULLABLE AS CHAR) AS is_nullable,
                    CAST(COLUMN_DEFAULT AS CHAR) AS default_value,
                    CAST(EXTRA AS CHAR) AS extra
             FROM information_schema.COLUMNS
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
             ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?;

        let columns = column_rows
            .iter()
            .map(|row| {
                let extra: Option<String> = row.try_get("extra").map_err(catalog_error)?;
                let is_nullable: String = row.try_get("is_nullable").map_err(catalog_error)?;
                Ok(ColumnMetadata {
                    name: row.try_get("column_name").map_err(catalog_error)?,
                    type_name: row.try_get("type_name").map_err(catalog_error)?,
                    size: row.try_get("size").map_err(catalog_error)?,
                    nullable: is_nullable.eq_ignore_ascii_case("YES"),
                    default_value: row.try_get("default_value").map_err(catalog_error)?,
                    auto_increment: extra
                        .is_some_and(|e| e.to_ascii_lowercase().contains("auto_increment")),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let primary_keys = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name
             FROM information_schema.KEY_COLUMN_USAGE
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
             ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?
        .iter()
        .map(|row| row.try_get::<String, _>("column_name").map_err(catalog_error))
        .collect::<EngineResult<Vec<_>>>()?;

        let indexes = sqlx::query(
            "SELECT CAST(INDEX_NAME AS CHAR) AS index_name,
                    CAST(COLUMN_NAME AS CHAR) AS column_name,
                    CAST(NON_UNIQUE AS SIGNED) AS non_unique
             FROM information_schema.STATISTICS
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?
        .iter()
        .map(|row| {
            Ok(IndexMetadata {
                name: row.try_get("index_name").map_err(catalog_error)?,
                column: row.try_get("column_name").map_err(catalog_error)?,
                unique: row.try_get::<i64, _>("non_unique").map_err(catalog_error)? == 0,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

        Ok(TableMetadata {
            table_name: table.to_string(),
            columns,
            primary_keys,
            indexes,
        })
    }
}
