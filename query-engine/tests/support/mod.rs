#![allow(dead_code)]

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use common::config::EngineConfig;
use common::models::{QueryParams, SourceConfig};
use connection_pool::ConnectionPoolRegistry;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor};
use tempfile::TempDir;

pub const SOURCE_ID: &str = "sales";

/// Creates the fixture database directly, bypassing the write policy.
pub async fn seed(path: &Path) {
    let mut conn = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .unwrap()
        .connect()
        .await
        .unwrap();

    conn.execute(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name VARCHAR(64) NOT NULL,
            email TEXT,
            score REAL DEFAULT 0
        );
        CREATE UNIQUE INDEX idx_users_email ON users (email);
        CREATE INDEX idx_users_name_score ON users (name, score);
        INSERT INTO users (id, name, email, score) VALUES
            (1, 'alice', 'alice@example.com', 9.5),
            (2, 'bob', NULL, 7.0),
            (3, 'O''Connor', 'oc@example.com', 3.25);
        CREATE TABLE big (x INTEGER NOT NULL);
        INSERT INTO big (x)
            WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000)
            SELECT x FROM c;",
    )
    .await
    .unwrap();

    conn.close().await.unwrap();
}

pub async fn registry_with(engine: EngineConfig) -> (TempDir, Arc<ConnectionPoolRegistry>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path).await;

    let registry = Arc::new(ConnectionPoolRegistry::new(engine));
    let mut config = SourceConfig::new(
        SOURCE_ID,
        "Sales",
        "sqlite",
        format!("sqlite:{}", path.display()),
        "app",
        "unused",
    );
    config.min_pool_size = Some(0);
    config.max_pool_size = Some(4);
    config.connection_timeout_ms = Some(2_000);
    registry.add(config).await.unwrap();
    (dir, registry)
}

pub fn engine() -> EngineConfig {
    EngineConfig {
        pool_close_timeout_secs: 1,
        ..Default::default()
    }
}

pub fn params(value: Value) -> QueryParams {
    match value {
        Value::Object(map) => map,
        _ => QueryParams::new(),
    }
}
