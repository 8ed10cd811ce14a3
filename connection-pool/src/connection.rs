//! Pool handles and borrowed connections.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::errors::{EngineError, EngineResult};
use common::models::DbType;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use tokio::time::error::Elapsed;

use crate::config_validator::ResolvedSource;
use crate::drivers::{self, FetchLimits, RawResultSet};

/// Connection pool wrapper for different database types.
#[derive(Clone)]
pub enum DatabasePool {
    /// MySQL connection pool.
    MySQL(MySqlPool),
    /// PostgreSQL connection pool.
    Postgres(PgPool),
    /// SQLite connection pool.
    SQLite(SqlitePool),
}

impl DatabasePool {
    /// Builds a pool that opens connections on first use.
    ///
    /// Returns `Ok(None)` for types without a native driver.
    pub(crate) fn connect_lazy(source: &ResolvedSource) -> EngineResult<Option<Self>> {
        Ok(match source.db_type {
            DbType::MySQL => Some(Self::MySQL(drivers::mysql::build_pool(source)?)),
            DbType::PostgreSQL => Some(Self::Postgres(drivers::postgres::build_pool(source)?)),
            DbType::SQLite => Some(Self::SQLite(drivers::sqlite::build_pool(source)?)),
            DbType::Oracle | DbType::SqlServer => None,
        })
    }

    pub async fn acquire(&self) -> Result<DriverConnection, sqlx::Error> {
        Ok(match self {
            Self::MySQL(p) => DriverConnection::MySQL(p.acquire().await?),
            Self::Postgres(p) => DriverConnection::Postgres(p.acquire().await?),
            Self::SQLite(p) => DriverConnection::SQLite(p.acquire().await?),
        })
    }

    /// Open connections, idle or checked out.
    pub fn size(&self) -> u32 {
        match self {
            Self::MySQL(p) => p.size(),
            Self::Postgres(p) => p.size(),
            Self::SQLite(p) => p.size(),
        }
    }

    pub fn num_idle(&self) -> u32 {
        let idle = match self {
            Self::MySQL(p) => p.num_idle(),
            Self::Postgres(p) => p.num_idle(),
            Self::SQLite(p) => p.num_idle(),
        };
        u32::try_from(idle).unwrap_or(u32::MAX)
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::MySQL(p) => p.is_closed(),
            Self::Postgres(p) => p.is_closed(),
            Self::SQLite(p) => p.is_closed(),
        }
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        match self {
            Self::MySQL(p) => p.close().await,
            Self::Postgres(p) => p.close().await,
            Self::SQLite(p) => p.close().await,
        }
    }
}

/// A connection checked out of one of the native pools.
#[derive(Debug)]
pub enum DriverConnection {
    MySQL(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DriverConnection {
    pub fn db_type(&self) -> DbType {
        match self {
            Self::MySQL(_) => DbType::MySQL,
            Self::Postgres(_) => DbType::PostgreSQL,
            Self::SQLite(_) => DbType::SQLite,
        }
    }

    /// Round-trips to the server.
    pub async fn ping(&mut self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySQL(c) => c.ping().await,
            Self::Postgres(c) => c.ping().await,
            Self::SQLite(c) => c.ping().await,
        }
    }

    /// Runs a read statement, binding `params` positionally, and reads rows
    /// up to `limits`.
    pub async fn fetch(
        &mut self,
        sql: &str,
        params: &[Value],
        limits: FetchLimits,
    ) -> Result<RawResultSet, sqlx::Error> {
        match self {
            Self::MySQL(c) => drivers::mysql::fetch(c, sql, params, limits).await,
            Self::Postgres(c) => drivers::postgres::fetch(c, sql, params, limits).await,
            Self::SQLite(c) => drivers::sqlite::fetch(c, sql, params, limits).await,
        }
    }

    /// Runs a write statement and returns the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
        match self {
            Self::MySQL(c) => drivers::mysql::execute(c, sql, params).await,
            Self::Postgres(c) => drivers::postgres::execute(c, sql, params).await,
            Self::SQLite(c) => drivers::sqlite::execute(c, sql, params).await,
        }
    }

    /// Has the server cancel any statement still running after `timeout`.
    pub async fn arm_statement_timeout(&mut self, timeout: Duration) -> Result<(), sqlx::Error> {
        match self {
            Self::MySQL(c) => drivers::mysql::arm_statement_timeout(c, timeout).await,
            Self::Postgres(c) => drivers::postgres::arm_statement_timeout(c, timeout).await,
            Self::SQLite(c) => drivers::sqlite::arm_statement_timeout(c, timeout).await,
        }
    }

    pub async fn disarm_statement_timeout(&mut self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySQL(c) => drivers::mysql::disarm_statement_timeout(c).await,
            Self::Postgres(c) => drivers::postgres::disarm_statement_timeout(c).await,
            Self::SQLite(c) => drivers::sqlite::disarm_statement_timeout(c).await,
        }
    }

    /// Whether `err` is the server cancelling a statement that ran out of time.
    pub fn is_statement_timeout(&self, err: &sqlx::Error) -> bool {
        match self {
            Self::MySQL(_) => drivers::mysql::is_statement_timeout(err),
            Self::Postgres(_) => drivers::postgres::is_statement_timeout(err),
            Self::SQLite(_) => drivers::sqlite::is_statement_timeout(err),
        }
    }

    /// Closes the connection and frees its pool slot.
    async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySQL(c) => PoolConnection::close(c).await,
            Self::Postgres(c) => PoolConnection::close(c).await,
            Self::SQLite(c) => PoolConnection::close(c).await,
        }
    }
}

/// Counts tasks blocked on a pool checkout for as long as it is alive.
pub(crate) struct WaitTicket(Arc<AtomicU32>);

impl WaitTicket {
    pub(crate) fn new(counter: Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One registered source's pool and its live counters.
///
/// Owned by the registry; callers only ever see snapshots of it.
pub struct PoolHandle {
    pool: DatabasePool,
    waiting: Arc<AtomicU32>,
    max_size: u32,
    leak_threshold: Duration,
}

impl PoolHandle {
    pub(crate) fn new(pool: DatabasePool, max_size: u32, leak_threshold: Duration) -> Self {
        Self {
            pool,
            waiting: Arc::new(AtomicU32::new(0)),
            max_size,
            leak_threshold,
        }
    }

    pub(crate) fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub(crate) fn waiting_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.waiting)
    }

    pub(crate) fn leak_threshold(&self) -> Duration {
        self.leak_threshold
    }

    /// Connections currently checked out.
    pub fn active(&self) -> u32 {
        self.total().saturating_sub(self.idle())
    }

    pub fn idle(&self) -> u32 {
        self.pool.num_idle()
    }

    pub fn total(&self) -> u32 {
        self.pool.size()
    }

    pub fn threads_waiting(&self) -> u32 {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Extra wait past the statement timeout before the client gives up on the
/// server cancelling the statement itself.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on closing a discarded connection.
const DISCARD_TIMEOUT: Duration = Duration::from_secs(5);

/// A borrowed connection. Returned to its pool on drop.
///
/// Holding it longer than the source's leak-detection threshold logs a
/// warning when it is released.
#[derive(Debug)]
pub struct PooledConnection {
    conn: DriverConnection,
    lease: Lease,
}

#[derive(Debug)]
struct Lease {
    source_id: String,
    checked_out_at: Instant,
    leak_threshold: Duration,
}

impl PooledConnection {
    pub(crate) fn new(source_id: impl Into<String>, conn: DriverConnection, leak_threshold: Duration) -> Self {
        Self {
            conn,
            lease: Lease {
                source_id: source_id.into(),
                checked_out_at: Instant::now(),
                leak_threshold,
            },
        }
    }

    pub fn source_id(&self) -> &str {
        &self.lease.source_id
    }

    /// Time since checkout.
    pub fn held_for(&self) -> Duration {
        self.lease.checked_out_at.elapsed()
    }

    /// Runs a read statement that the server cancels after `timeout`, then
    /// releases the connection.
    ///
    /// A connection whose statement timed out is closed rather than returned
    /// to the pool, so its slot is free again when this returns.
    pub async fn fetch_within(
        mut self,
        sql: &str,
        params: &[Value],
        limits: FetchLimits,
        timeout: Duration,
    ) -> EngineResult<RawResultSet> {
        let armed = self.conn.arm_statement_timeout(timeout).await;
        if let Err(e) = armed {
            self.discard().await;
            return Err(EngineError::driver("failed to set statement timeout", e));
        }
        let outcome = tokio::time::timeout(timeout + CANCEL_GRACE, self.conn.fetch(sql, params, limits)).await;
        self.settle(outcome, timeout, "query execution failed").await
    }

    /// Write counterpart of [`PooledConnection::fetch_within`]; returns the
    /// affected row count.
    pub async fn execute_within(mut self, sql: &str, params: &[Value], timeout: Duration) -> EngineResult<u64> {
        let armed = self.conn.arm_statement_timeout(timeout).await;
        if let Err(e) = armed {
            self.discard().await;
            return Err(EngineError::driver("failed to set statement timeout", e));
        }
        let outcome = tokio::time::timeout(timeout + CANCEL_GRACE, self.conn.execute(sql, params)).await;
        self.settle(outcome, timeout, "update execution failed").await
    }

    async fn settle<T>(
        mut self,
        outcome: Result<Result<T, sqlx::Error>, Elapsed>,
        timeout: Duration,
        failure: &'static str,
    ) -> EngineResult<T> {
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if self.conn.is_statement_timeout(&e) => {
                self.discard().await;
                return Err(EngineError::timeout(timeout));
            }
            Ok(Err(e)) => Err(EngineError::driver(failure, e)),
            Err(_) => {
                self.discard().await;
                return Err(EngineError::timeout(timeout));
            }
        };

        let disarmed = self.conn.disarm_statement_timeout().await;
        if let Err(e) = disarmed {
            tracing::warn!(source_id = %self.source_id(), error = %e, "Failed to clear statement timeout");
            self.discard().await;
        }
        result
    }

    /// Closes the connection instead of returning it to the pool.
    pub async fn discard(self) {
        let Self { conn, lease } = self;
        match tokio::time::timeout(DISCARD_TIMEOUT, conn.close()).await {
            Ok(Ok(())) => tracing::debug!(source_id = %lease.source_id, "Connection discarded"),
            Ok(Err(e)) => tracing::warn!(source_id = %lease.source_id, error = %e, "Discarded connection closed uncleanly"),
            Err(_) => tracing::warn!(source_id = %lease.source_id, "Discarded connection did not close in time"),
        }
    }
}

impl Deref for PooledConnection {
    type Target = DriverConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let held = self.checked_out_at.elapsed();
        if held > self.leak_threshold {
            tracing::warn!(
                source_id = %self.source_id,
                held_ms = held.as_millis() as u64,
                threshold_ms = self.leak_threshold.as_millis() as u64,
                "Connection held past leak-detection threshold"
            );
        }
    }
}
