//! SQL query models.
//!
//! Contains models for SQL query execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named parameters of a query. Iteration follows insertion order, which is
/// the order positional `?` markers are bound in.
pub type QueryParams = Map<String, Value>;

/// One result row: column name to value, in result-set column order.
pub type ResultRow = Map<String, Value>;

/// Request body for executing a SQL query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// SQL template; may contain `#{name}` placeholders and `?` markers.
    pub sql: String,

    /// Values for named placeholders and positional markers.
    #[serde(default)]
    pub params: QueryParams,

    /// Row limit for this request; capped by the engine-wide maximum.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    /// Adds a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of a SQL query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column descriptors, left to right.
    pub columns: Vec<ColumnDescriptor>,

    /// Row data.
    pub rows: Vec<ResultRow>,

    /// Number of rows returned.
    pub row_count: usize,

    /// Query execution time in milliseconds.
    pub execution_time_ms: u64,

    /// When execution started.
    pub executed_at: DateTime<Utc>,
}

/// Column information in query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as reported by the driver.
    pub name: String,

    /// Display label (the alias when one was given).
    pub label: String,

    /// Vendor type name, e.g. `VARCHAR`, `INT8`.
    pub type_name: String,

    /// Standard SQL type code derived from the type name.
    pub type_code: i32,

    /// Whether the column is nullable, when the driver reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

/// Standard SQL type codes (the X/Open and JDBC numbering).
pub mod type_codes {
    pub const BIT: i32 = -7;
    pub const TINYINT: i32 = -6;
    pub const SMALLINT: i32 = 5;
    pub const INTEGER: i32 = 4;
    pub const BIGINT: i32 = -5;
    pub const FLOAT: i32 = 6;
    pub const REAL: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const NUMERIC: i32 = 2;
    pub const DECIMAL: i32 = 3;
    pub const CHAR: i32 = 1;
    pub const VARCHAR: i32 = 12;
    pub const LONGVARCHAR: i32 = -1;
    pub const DATE: i32 = 91;
    pub const TIME: i32 = 92;
    pub const TIMESTAMP: i32 = 93;
    pub const BINARY: i32 = -2;
    pub const VARBINARY: i32 = -3;
    pub const LONGVARBINARY: i32 = -4;
    pub const NULL: i32 = 0;
    pub const OTHER: i32 = 1111;
    pub const BOOLEAN: i32 = 16;
    pub const BLOB: i32 = 2004;
    pub const TIME_WITH_TIMEZONE: i32 = 2013;
    pub const TIMESTAMP_WITH_TIMEZONE: i32 = 2014;
}

/// Maps a vendor type name onto a standard SQL type code.
///
/// Length modifiers and `UNSIGNED` are ignored; unknown names map to `OTHER`.
pub fn sql_type_code(type_name: &str) -> i32 {
    use type_codes::*;

    let upper = type_name.trim().to_uppercase();
    let base = upper
        .split('(')
        .next()
        .unwrap_or_default()
        .trim_end_matches(" UNSIGNED")
        .trim();

    match base {
        "BOOLEAN" | "BOOL" => BOOLEAN,
        "BIT" => BIT,
        "TINYINT" => TINYINT,
        "SMALLINT" | "INT2" => SMALLINT,
        "MEDIUMINT" | "INT" | "INTEGER" | "INT4" => INTEGER,
        "BIGINT" | "INT8" => BIGINT,
        "FLOAT" => FLOAT,
        "REAL" | "FLOAT4" => REAL,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => DOUBLE,
        "NUMERIC" => NUMERIC,
        "DECIMAL" | "DEC" | "FIXED" => DECIMAL,
        "CHAR" | "CHARACTER" | "BPCHAR" => CHAR,
        "VARCHAR" | "CHARACTER VARYING" | "NAME" => VARCHAR,
        "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "CLOB" => LONGVARCHAR,
        "DATE" => DATE,
        "TIME" => TIME,
        "TIMETZ" => TIME_WITH_TIMEZONE,
        "DATETIME" | "TIMESTAMP" => TIMESTAMP,
        "TIMESTAMPTZ" => TIMESTAMP_WITH_TIMEZONE,
        "BINARY" => BINARY,
        "VARBINARY" | "BYTEA" => VARBINARY,
        "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => LONGVARBINARY,
        "BLOB" => BLOB,
        "NULL" => NULL,
        _ => OTHER,
    }
}
