//! Pool monitoring models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::{DbType, HealthStatus};

/// Point-in-time snapshot of one source's pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    /// Source ID.
    pub source_id: String,
    /// Source display name.
    pub name: String,
    /// Database type.
    pub db_type: DbType,
    /// Connections currently checked out.
    pub active: u32,
    /// Connections idle in the pool.
    pub idle: u32,
    /// Open connections (active + idle).
    pub total: u32,
    /// Configured maximum pool size.
    pub max_size: u32,
    /// Callers waiting for a connection.
    pub threads_waiting: u32,
    /// Whether the pool has been closed.
    pub closed: bool,
    /// Health flag from the most recent probe.
    pub health_status: HealthStatus,
    /// When this snapshot was taken.
    pub checked_at: DateTime<Utc>,
}
