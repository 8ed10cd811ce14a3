//! Data-source configuration models.
//!
//! A [`SourceConfig`] is owned by the admin layer and handed to the registry
//! by value. The secret never leaves this struct: it is skipped on
//! serialization and redacted from `Debug` output.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Supported database types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// MySQL database.
    MySQL,
    /// PostgreSQL database.
    PostgreSQL,
    /// Oracle database.
    Oracle,
    /// Microsoft SQL Server.
    SqlServer,
    /// SQLite database file.
    SQLite,
}

impl DbType {
    /// Every supported type.
    pub const ALL: [DbType; 5] = [
        DbType::MySQL,
        DbType::PostgreSQL,
        DbType::Oracle,
        DbType::SqlServer,
        DbType::SQLite,
    ];

    /// Parses a type name case-insensitively. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::MySQL => "mysql",
            DbType::PostgreSQL => "postgresql",
            DbType::Oracle => "oracle",
            DbType::SqlServer => "sqlserver",
            DbType::SQLite => "sqlite",
        }
    }

    /// Driver used when the config does not name one.
    pub fn default_driver(&self) -> &'static str {
        match self {
            DbType::MySQL => "sqlx-mysql",
            DbType::PostgreSQL => "sqlx-postgres",
            DbType::Oracle => "oracle-oci",
            DbType::SqlServer => "tds",
            DbType::SQLite => "sqlx-sqlite",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative status of a source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Disabled,
    #[default]
    Enabled,
}

/// Result of the most recent connectivity probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Never probed.
    #[default]
    Unknown,
    /// Last probe succeeded.
    Healthy,
    /// Last probe failed; the source stays registered and usable.
    Degraded,
}

/// Runtime health fields of a registered source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceHealth {
    pub status: SourceStatus,
    pub health_status: HealthStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SourceHealth {
    /// Records a successful probe.
    pub fn mark_healthy(&mut self, at: DateTime<Utc>) {
        self.status = SourceStatus::Enabled;
        self.health_status = HealthStatus::Healthy;
        self.last_connected_at = Some(at);
        self.last_health_check_at = Some(at);
        self.error_message = None;
    }

    /// Records a failed probe.
    pub fn mark_degraded(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.health_status = HealthStatus::Degraded;
        self.last_health_check_at = Some(at);
        self.error_message = Some(error.into());
    }
}

/// Full data-source configuration.
#[derive(Clone, Default, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Unique source identifier.
    #[validate(length(min = 1, message = "id must not be empty"))]
    pub id: String,
    /// Display name.
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,
    /// Database type name (`mysql`, `postgresql`, `oracle`, `sqlserver`, `sqlite`).
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "type must not be empty"))]
    pub db_type: String,
    /// Connection URL.
    #[validate(length(min = 1, message = "url must not be empty"))]
    pub url: String,
    /// Database user.
    #[validate(length(min = 1, message = "username must not be empty"))]
    pub username: String,
    /// Database password (never serialized).
    #[serde(skip_serializing, default)]
    #[validate(length(min = 1, message = "secret must not be empty"))]
    pub secret: String,
    /// Driver name; defaulted per type when absent.
    #[serde(default)]
    pub driver: Option<String>,

    /// Minimum idle connections kept by the pool.
    #[serde(default)]
    pub min_pool_size: Option<u32>,
    /// Maximum pool size.
    #[serde(default)]
    #[validate(range(min = 1, message = "max_pool_size must be at least 1"))]
    pub max_pool_size: Option<u32>,
    /// How long a checkout may wait for a free connection.
    #[serde(default)]
    #[validate(range(min = 1, message = "connection_timeout_ms must be positive"))]
    pub connection_timeout_ms: Option<u64>,
    /// Idle connections older than this are closed.
    #[serde(default)]
    #[validate(range(min = 1, message = "idle_timeout_ms must be positive"))]
    pub idle_timeout_ms: Option<u64>,
    /// Connections older than this are retired.
    #[serde(default)]
    #[validate(range(min = 1, message = "max_lifetime_ms must be positive"))]
    pub max_lifetime_ms: Option<u64>,
    /// Timeout of the validity check run on checkout.
    #[serde(default)]
    #[validate(range(min = 1, message = "validation_timeout_ms must be positive"))]
    pub validation_timeout_ms: Option<u64>,
    /// Connections held longer than this are reported as possible leaks.
    #[serde(default)]
    #[validate(range(min = 1, message = "leak_detection_threshold_ms must be positive"))]
    pub leak_detection_threshold_ms: Option<u64>,

    /// Runtime health fields.
    #[serde(flatten)]
    pub health: SourceHealth,
}

impl SourceConfig {
    /// Creates a config with the required fields set and everything else
    /// left for defaulting.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        db_type: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            db_type: db_type.into(),
            url: url.into(),
            username: username.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("driver", &self.driver)
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("max_lifetime_ms", &self.max_lifetime_ms)
            .field("validation_timeout_ms", &self.validation_timeout_ms)
            .field("leak_detection_threshold_ms", &self.leak_detection_threshold_ms)
            .field("health", &self.health)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_db_type() {
        assert_eq!(DbType::parse("MySQL"), Some(DbType::MySQL));
        assert_eq!(DbType::parse(" postgresql "), Some(DbType::PostgreSQL));
        assert_eq!(DbType::parse("sqlserver"), Some(DbType::SqlServer));
        assert_eq!(DbType::parse("mongodb"), None);
    }

    #[test]
    fn test_secret_is_not_serialized() {
        let config = SourceConfig::new("ds-1", "orders", "mysql", "mysql://db/orders", "app", "hunter2");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"type\":\"mysql\""));
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = SourceConfig::new("ds-1", "orders", "mysql", "mysql://db/orders", "app", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_health_transitions() {
        let mut health = SourceHealth::default();
        assert_eq!(health.health_status, HealthStatus::Unknown);

        let now = Utc::now();
        health.mark_degraded(now, "connection refused");
        assert_eq!(health.health_status, HealthStatus::Degraded);
        assert_eq!(health.error_message.as_deref(), Some("connection refused"));
        assert!(health.last_connected_at.is_none());

        health.mark_healthy(now);
        assert_eq!(health.health_status, HealthStatus::Healthy);
        assert!(health.error_message.is_none());
        assert_eq!(health.last_connected_at, Some(now));
    }
}
