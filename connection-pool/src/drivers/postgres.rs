//! PostgreSQL adapter.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use common::errors::{EngineError, EngineResult};
use common::models::{ColumnMetadata, IndexMetadata, TableMetadata};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgRow, Postgres};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use uuid::Uuid;

use super::{bind_value, CatalogAdapter, FetchLimits, RawColumn, RawResultSet};
use crate::config_validator::ResolvedSource;
use crate::connection::DriverConnection;

pub(crate) fn build_pool(source: &ResolvedSource) -> EngineResult<PgPool> {
    let config = &source.config;
    let options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| {
            EngineError::configuration(format!("invalid postgresql url: {}", e)).with_source_id(&config.id)
        })?
        .username(&config.username)
        .password(&config.secret);

    let settings = &source.settings;
    Ok(PoolOptions::<Postgres>::new()
        .min_connections(settings.min_size)
        .max_connections(settings.max_size)
        .acquire_timeout(settings.connection_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        .max_lifetime(Some(settings.max_lifetime))
        .connect_lazy_with(options))
}

/// Rewrites `?` markers outside string literals into `$1`, `$2`, ... and
/// returns the values left to bind.
///
/// NULL values are written inline as `NULL` so the server infers their type
/// from context; a bound NULL would carry a text type.
pub fn rewrite_positional<'v>(sql: &str, params: &'v [Value]) -> (String, Vec<&'v Value>) {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut binds = Vec::with_capacity(params.len());
    let mut in_literal = false;
    let mut marker = 0;
    let mut placeholder = 0;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                match params.get(marker) {
                    Some(Value::Null) => out.push_str("NULL"),
                    value => {
                        binds.extend(value);
                        placeholder += 1;
                        out.push('$');
                        out.push_str(&placeholder.to_string());
                    }
                }
                marker += 1;
            }
            _ => out.push(c),
        }
    }
    (out, binds)
}

pub(crate) async fn fetch(
    conn: &mut PgConnection,
    sql: &str,
    params: &[Value],
    limits: FetchLimits,
) -> Result<RawResultSet, sqlx::Error> {
    let (sql, binds) = if params.is_empty() {
        (sql.to_string(), Vec::new())
    } else {
        rewrite_positional(sql, params)
    };

    let statement = (&mut *conn).prepare(&sql).await?;
    let columns = statement
        .columns()
        .iter()
        .map(|c| RawColumn {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
            nullable: None,
        })
        .collect();

    let mut query = sqlx::query(&sql);
    for value in binds {
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

pub(crate) async fn execute(conn: &mut PgConnection, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
    let (sql, binds) = if params.is_empty() {
        (sql.to_string(), Vec::new())
    } else {
        rewrite_positional(sql, params)
    };
    let mut query = sqlx::query(&sql);
    for value in binds {
        query = bind_value(query, value);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

/// `query_canceled`.
const QUERY_CANCELED: &str = "57014";

pub(crate) async fn arm_statement_timeout(conn: &mut PgConnection, timeout: Duration) -> Result<(), sqlx::Error> {
    let sql = format!("SET statement_timeout = {}", timeout.as_millis().max(1));
    (&mut *conn).execute(sql.as_str()).await?;
    Ok(())
}

pub(crate) async fn disarm_statement_timeout(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    (&mut *conn).execute("RESET statement_timeout").await?;
    Ok(())
}

pub(crate) fn is_statement_timeout(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.code().as_deref() == Some(QUERY_CANCELED))
}

fn decode_row(row: &PgRow) -> Vec<Value> {
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

fn decode_by_type(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool).unwrap_or(Value::Null),
        "INT2" => row.try_get::<i16, _>(index).map(Value::from).unwrap_or(Value::Null),
        "INT4" => row.try_get::<i32, _>(index).map(Value::from).unwrap_or(Value::Null),
        "INT8" => row.try_get::<i64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::from(f64::from(v)))
            .unwrap_or(Value::Null),
        "FLOAT8" => row.try_get::<f64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "NUMERIC" => row
            .try_get::<Decimal, _>(index)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(Value::from).unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|dt| Value::String(dt.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Uuid, _>(index)
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index).unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn catalog_error(e: sqlx::Error) -> EngineError {
    EngineError::driver("postgresql catalog lookup failed", e)
}

/// Catalog reads through `information_schema` and `pg_index`.
pub struct PgCatalog;

impl PgCatalog {
    fn connection<'c>(conn: &'c mut DriverConnection) -> EngineResult<&'c mut PgConnection> {
        match conn {
            DriverConnection::Postgres(c) => Ok(&mut **c),
            other => Err(EngineError::internal(format!(
                "postgresql catalog used with a {} connection",
                other.db_type()
            ))),
        }
    }
}

#[async_trait]
impl CatalogAdapter for PgCatalog {
    async fn list_tables(&self, conn: &mut DriverConnection, schema: Option<&str>) -> EngineResult<Vec<String>> {
        let conn = Self::connection(conn)?;
        let rows = sqlx::query(
            "SELECT table_name::text AS table_name
             FROM information_schema.tables
             WHERE table_schema = COALESCE($1::text, current_schema()) AND table_type = 'BASE TABLE'
             ORDER BY table_name",
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

        let columns = sqlx::query(
            "SELECT column_name::text AS column_name,
                    upper(udt_name::text) AS type_name,
                    COALESCE(character_maximum_length, numeric_precision)::int8 AS size,
                    (is_nullable = 'YES') AS nullable,
                    column_default::text AS default_value,
                    COALESCE(column_default LIKE 'nextval(%' OR is_identity = 'YES', false) AS auto_increment
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?
        .iter()
        .map(|row| {
            Ok(ColumnMetadata {
                name: row.try_get("column_name").map_err(catalog_error)?,
                type_name: row.try_get("type_name").map_err(catalog_error)?,
                size: row.try_get("size").map_err(catalog_error)?,
                nullable: row.try_get("nullable").map_err(catalog_error)?,
                default_value: row.try_get("default_value").map_err(catalog_error)?,
                auto_increment: row.try_get("auto_increment").map_err(catalog_error)?,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

        let primary_keys = sqlx::query(
            "SELECT a.attname::text AS column_name
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             WHERE i.indrelid = to_regclass($1) AND i.indisprimary
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(catalog_error)?
        .iter()
        .map(|row| row.try_get::<String, _>("column_name").map_err(catalog_error))
        .collect::<EngineResult<Vec<_>>>()?;

        let indexes = sqlx::query(
            "SELECT ic.relname::text AS index_name,
                    a.attname::text AS column_name,
                    i.indisunique AS is_unique
             FROM pg_index i
             JOIN pg_class ic ON ic.oid = i.indexrelid
             LEFT JOIN pg_attribute a
                    ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) AND a.attnum > 0
             WHERE i.indrelid = to_regclass($1)
             ORDER BY ic.relname, array_position(i.indkey::int2[], a.attnum)",
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
                unique: row.try_get("is_unique").map_err(catalog_error)?,
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
