//! Data-source connection pool registry.
//!
//! Maps source ids to live pools. The outer `RwLock` guards map membership
//! only: checkouts clone the pool handle out under the read lock and wait on
//! the pool itself after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use common::config::EngineConfig;
use common::errors::{EngineError, EngineResult};
use common::models::{DbType, PoolInfo, SourceConfig, SourceHealth};
use tokio::sync::RwLock;

use crate::config_validator::SourceConfigValidator;
use crate::connection::{DatabasePool, PoolHandle, PooledConnection, WaitTicket};

/// Outcome of [`ConnectionPoolRegistry::shutdown`], ids in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pools that closed cleanly.
    pub closed: Vec<String>,
    /// Pools that still had connections checked out when the close timeout
    /// elapsed.
    pub timed_out: Vec<String>,
}

/// One registered source.
struct SourceEntry {
    config: SourceConfig,
    db_type: DbType,
    handle: PoolHandle,
    validation_timeout: Duration,
    health: Arc<Mutex<SourceHealth>>,
}

impl SourceEntry {
    fn info(&self) -> PoolInfo {
        PoolInfo {
            source_id: self.config.id.clone(),
            name: self.config.name.clone(),
            db_type: self.db_type,
            active: self.handle.active(),
            idle: self.handle.idle(),
            total: self.handle.total(),
            max_size: self.handle.max_size(),
            threads_waiting: self.handle.threads_waiting(),
            closed: self.handle.is_closed(),
            health_status: lock_health(&self.health).health_status,
            checked_at: Utc::now(),
        }
    }

    fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            source_id: self.config.id.clone(),
            pool: self.handle.pool().clone(),
            validation_timeout: self.validation_timeout,
            health: Arc::clone(&self.health),
        }
    }
}

/// Everything a probe needs, detached from the registry lock.
struct ProbeTarget {
    source_id: String,
    pool: DatabasePool,
    validation_timeout: Duration,
    health: Arc<Mutex<SourceHealth>>,
}

fn lock_health(health: &Mutex<SourceHealth>) -> MutexGuard<'_, SourceHealth> {
    health.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registry of data-source connection pools.
///
/// Created once per process and shared behind an `Arc`.
pub struct ConnectionPoolRegistry {
    engine: EngineConfig,
    /// Registered sources indexed by source ID.
    sources: RwLock<HashMap<String, SourceEntry>>,
}

impl ConnectionPoolRegistry {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Registers a source.
    ///
    /// Validates the config, builds its pool and probes it. The source is
    /// cached only when the probe succeeds.
    pub async fn add(&self, config: SourceConfig) -> EngineResult<()> {
        let resolved = SourceConfigValidator::validate(&config)?;
        let id = resolved.config.id.clone();

        let mut sources = self.sources.write().await;
        if sources.contains_key(&id) {
            return Err(EngineError::configuration(format!("data source already registered: {}", id))
                .with_source_id(&id));
        }

        let pool = DatabasePool::connect_lazy(&resolved)?.ok_or_else(|| {
            EngineError::configuration(format!(
                "no native driver available for {} ({})",
                resolved.db_type,
                resolved.db_type.default_driver()
            ))
            .with_source_id(&id)
        })?;

        let validation_timeout = resolved.settings.validation_timeout;
        let start = Instant::now();
        if let Err(e) = self.probe(&pool, validation_timeout).await {
            tracing::warn!(source_id = %id, error = %e, "Data source probe failed; not registered");
            self.close_pool(&id, &pool).await;
            return Err(e.with_source_id(&id).with_elapsed(start.elapsed()));
        }

        let mut health = resolved.config.health.clone();
        health.mark_healthy(Utc::now());

        let entry = SourceEntry {
            handle: PoolHandle::new(
                pool,
                resolved.settings.max_size,
                resolved.settings.leak_detection_threshold,
            ),
            db_type: resolved.db_type,
            validation_timeout,
            health: Arc::new(Mutex::new(health)),
            config: resolved.config,
        };
        tracing::info!(
            source_id = %id,
            name = %entry.config.name,
            db_type = %entry.db_type,
            max_size = resolved.settings.max_size,
            "Data source registered"
        );
        sources.insert(id, entry);
        Ok(())
    }

    /// Unregisters a source and closes its pool. Unknown ids are ignored.
    ///
    /// Returns whether a source was removed.
    pub async fn remove(&self, id: &str) -> bool {
        let entry = self.sources.write().await.remove(id);
        match entry {
            Some(entry) => {
                self.close_pool(id, entry.handle.pool()).await;
                tracing::info!(source_id = %id, "Data source removed");
                true
            }
            None => false,
        }
    }

    /// Replaces a source: `remove(id)` then `add(config)`.
    ///
    /// Not atomic. The source is unavailable between the two steps, and stays
    /// unregistered if the new config fails to register.
    pub async fn update(&self, id: &str, config: SourceConfig) -> EngineResult<()> {
        if config.id.trim() != id {
            return Err(EngineError::configuration(format!(
                "config id {} does not match source id {}",
                config.id, id
            ))
            .with_source_id(id));
        }
        self.remove(id).await;
        self.add(config).await
    }

    /// Borrows a connection from a source's pool.
    ///
    /// May wait up to the source's connection timeout when the pool is
    /// saturated; the registry lock is not held while waiting.
    pub async fn acquire_connection(&self, id: &str) -> EngineResult<PooledConnection> {
        let (pool, waiting, leak_threshold) = {
            let sources = self.sources.read().await;
            let entry = sources.get(id).ok_or_else(|| EngineError::unknown_source(id))?;
            if entry.handle.is_closed() {
                return Err(EngineError::connectivity("connection pool is closed").with_source_id(id));
            }
            (
                entry.handle.pool().clone(),
                entry.handle.waiting_counter(),
                entry.handle.leak_threshold(),
            )
        };

        let start = Instant::now();
        let conn = {
            let _ticket = WaitTicket::new(waiting);
            pool.acquire().await.map_err(|e| {
                EngineError::driver("failed to acquire connection", e)
                    .with_source_id(id)
                    .with_elapsed(start.elapsed())
            })?
        };
        tracing::trace!(source_id = %id, wait_ms = start.elapsed().as_millis() as u64, "Connection acquired");
        Ok(PooledConnection::new(id, conn, leak_threshold))
    }

    /// Probes a source and records the outcome in its health fields.
    ///
    /// A failed probe is reported as `false`; only an unknown id is an error.
    pub async fn test_connection(&self, id: &str) -> EngineResult<bool> {
        let target = {
            let sources = self.sources.read().await;
            sources
                .get(id)
                .map(SourceEntry::probe_target)
                .ok_or_else(|| EngineError::unknown_source(id))?
        };
        Ok(self.probe_and_record(target).await)
    }

    /// Probes every registered source.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let targets: Vec<ProbeTarget> = {
            let sources = self.sources.read().await;
            sources.values().map(SourceEntry::probe_target).collect()
        };

        let ids: Vec<String> = targets.iter().map(|t| t.source_id.clone()).collect();
        let results = futures::future::join_all(targets.into_iter().map(|t| self.probe_and_record(t))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Snapshot of one source's pool counters.
    pub async fn pool_info(&self, id: &str) -> EngineResult<PoolInfo> {
        let sources = self.sources.read().await;
        sources
            .get(id)
            .map(SourceEntry::info)
            .ok_or_else(|| EngineError::unknown_source(id))
    }

    /// Snapshots of every registered source, ordered by id.
    pub async fn all_pool_info(&self) -> Vec<PoolInfo> {
        let sources = self.sources.read().await;
        let mut infos: Vec<PoolInfo> = sources.values().map(SourceEntry::info).collect();
        infos.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        infos
    }

    /// The cached config of a source with its current health fields.
    pub async fn source_config(&self, id: &str) -> EngineResult<SourceConfig> {
        let sources = self.sources.read().await;
        let entry = sources.get(id).ok_or_else(|| EngineError::unknown_source(id))?;
        let mut config = entry.config.clone();
        config.health = lock_health(&entry.health).clone();
        Ok(config)
    }

    /// Database type of a registered source.
    pub async fn db_type(&self, id: &str) -> EngineResult<DbType> {
        let sources = self.sources.read().await;
        sources
            .get(id)
            .map(|entry| entry.db_type)
            .ok_or_else(|| EngineError::unknown_source(id))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sources.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    /// Closes every pool and empties the registry.
    ///
    /// Pools that fail to close in time are logged and skipped. Safe to call
    /// more than once.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut sources = self.sources.write().await;
        let mut report = ShutdownReport::default();
        if sources.is_empty() {
            return report;
        }
        let mut entries: Vec<(String, SourceEntry)> = sources.drain().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let closed = futures::future::join_all(
            entries
                .iter()
                .map(|(id, entry)| self.close_pool(id, entry.handle.pool())),
        )
        .await;
        for ((id, _), ok) in entries.into_iter().zip(closed) {
            if ok {
                report.closed.push(id);
            } else {
                report.timed_out.push(id);
            }
        }

        if report.timed_out.is_empty() {
            tracing::info!(total = report.closed.len(), "Registry shut down");
        } else {
            tracing::warn!(
                total = report.closed.len() + report.timed_out.len(),
                failed = report.timed_out.len(),
                "Registry shut down with pools that did not close cleanly"
            );
        }
        report
    }

    /// Acquire plus ping, bounded by the probe timeout.
    async fn probe(&self, pool: &DatabasePool, validation_timeout: Duration) -> EngineResult<()> {
        let limit = self.engine.probe_timeout();
        let attempt = async {
            let mut conn = pool
                .acquire()
                .await
                .map_err(|e| EngineError::driver("probe connection failed", e))?;
            match tokio::time::timeout(validation_timeout, conn.ping()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(EngineError::driver("probe ping failed", e)),
                Err(_) => Err(EngineError::connectivity(format!(
                    "probe ping exceeded {}ms",
                    validation_timeout.as_millis()
                ))),
            }
        };
        match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::connectivity(format!(
                "probe exceeded {}ms",
                limit.as_millis()
            ))),
        }
    }

    async fn probe_and_record(&self, target: ProbeTarget) -> bool {
        let result = self.probe(&target.pool, target.validation_timeout).await;
        let now = Utc::now();
        let mut health = lock_health(&target.health);
        match result {
            Ok(()) => {
                health.mark_healthy(now);
                tracing::debug!(source_id = %target.source_id, "Health probe succeeded");
                true
            }
            Err(e) => {
                health.mark_degraded(now, e.to_string());
                tracing::warn!(source_id = %target.source_id, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Closes a pool, waiting at most the configured close timeout.
    async fn close_pool(&self, id: &str, pool: &DatabasePool) -> bool {
        let limit = self.engine.pool_close_timeout();
        match tokio::time::timeout(limit, pool.close()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    source_id = %id,
                    timeout_ms = limit.as_millis() as u64,
                    "Pool did not close in time; connections still checked out"
                );
                false
            }
        }
    }
}
