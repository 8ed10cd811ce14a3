//! Ad-hoc SQL execution.
//!
//! Every statement goes through the same pipeline: policy check, `#{name}`
//! substitution, connection checkout, positional binding, bounded execution
//! and result mapping. The borrowed connection is returned to its pool when
//! the pipeline exits, whichever way it exits; after a timeout it is closed
//! instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::config::EngineConfig;
use common::errors::{truncate_sql, EngineError, EngineResult};
use common::models::{sql_type_code, ColumnDescriptor, QueryParams, QueryRequest, QueryResult, ResultRow};
use common::utils::{count_positional_markers, DynamicSqlTemplater, QuerySafetyValidator};
use connection_pool::{ConnectionPoolRegistry, FetchLimits, RawResultSet};
use serde_json::Value;
use tokio::sync::Semaphore;

/// Runs caller-supplied SQL against registered sources.
#[derive(Clone)]
pub struct QueryExecutor {
    registry: Arc<ConnectionPoolRegistry>,
    config: EngineConfig,
    /// Bounds concurrent async executions.
    workers: Arc<Semaphore>,
}

impl QueryExecutor {
    /// Creates an executor using the registry's engine configuration.
    pub fn new(registry: Arc<ConnectionPoolRegistry>) -> Self {
        let config = registry.engine_config().clone();
        Self::with_config(registry, config)
    }

    pub fn with_config(registry: Arc<ConnectionPoolRegistry>, config: EngineConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.async_workers.max(1)));
        Self {
            registry,
            config,
            workers,
        }
    }

    /// Runs a read statement.
    ///
    /// `limit` lowers the engine-wide row cap for this call; it never raises it.
    ///
    /// # Errors
    /// - `Configuration` for an unknown source or an unbound `#{name}`
    /// - `PolicyViolation` when the statement fails the read policy
    /// - `Connectivity` when checkout or execution fails
    /// - `Timeout` when execution exceeds the query timeout
    pub async fn execute_query(
        &self,
        source_id: &str,
        sql: &str,
        params: &QueryParams,
        limit: Option<u32>,
    ) -> EngineResult<QueryResult> {
        let start = Instant::now();
        let executed_at = Utc::now();
        let fail = |e: EngineError| e.with_source_id(source_id).with_sql(sql).with_elapsed(start.elapsed());

        QuerySafetyValidator::validate_for_read(sql).map_err(fail)?;
        let rendered = DynamicSqlTemplater::substitute(sql, params).map_err(fail)?;
        let binds = positional_binds(&rendered, params);
        let limits = FetchLimits {
            max_rows: self.row_cap(limit),
            fetch_size: self.config.fetch_size as usize,
        };

        let conn = self.registry.acquire_connection(source_id).await.map_err(fail)?;
        let raw = conn
            .fetch_within(&rendered, &binds, limits, self.config.query_timeout())
            .await
            .map_err(fail)?;

        let result = map_result(raw, start, executed_at);
        tracing::info!(
            source_id = %source_id,
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "Query executed"
        );
        tracing::debug!(source_id = %source_id, sql = %truncate_sql(&rendered), "Query text");
        Ok(result)
    }

    /// Runs a [`QueryRequest`].
    pub async fn execute_request(&self, source_id: &str, request: &QueryRequest) -> EngineResult<QueryResult> {
        self.execute_query(source_id, &request.sql, &request.params, request.limit)
            .await
    }

    /// Runs an `INSERT` or `UPDATE` and returns the affected row count.
    ///
    /// # Errors
    /// Same taxonomy as [`QueryExecutor::execute_query`], with the write policy.
    pub async fn execute_update(&self, source_id: &str, sql: &str, params: &QueryParams) -> EngineResult<u64> {
        let start = Instant::now();
        let fail = |e: EngineError| e.with_source_id(source_id).with_sql(sql).with_elapsed(start.elapsed());

        QuerySafetyValidator::validate_for_write(sql).map_err(fail)?;
        let rendered = DynamicSqlTemplater::substitute(sql, params).map_err(fail)?;
        let binds = positional_binds(&rendered, params);

        let conn = self.registry.acquire_connection(source_id).await.map_err(fail)?;
        let affected = conn
            .execute_within(&rendered, &binds, self.config.query_timeout())
            .await
            .map_err(fail)?;

        tracing::info!(
            source_id = %source_id,
            affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Update executed"
        );
        Ok(affected)
    }

    /// Runs a read statement on the worker pool.
    ///
    /// Work starts immediately; the returned future only waits for the
    /// result. At most `async_workers` executions run at once, the rest queue.
    pub fn execute_query_async(
        &self,
        source_id: impl Into<String>,
        sql: impl Into<String>,
        params: QueryParams,
        limit: Option<u32>,
    ) -> impl Future<Output = EngineResult<QueryResult>> + Send + 'static {
        let executor = self.clone();
        let source_id = source_id.into();
        let sql = sql.into();

        let task = tokio::spawn(async move {
            let _permit = Arc::clone(&executor.workers)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::internal("query worker pool is closed"))?;
            executor.execute_query(&source_id, &sql, &params, limit).await
        });

        async move {
            task.await
                .map_err(|e| EngineError::internal(format!("query worker failed: {}", e)))?
        }
    }

    /// Effective row cap: the smaller of `limit` and the engine maximum.
    fn row_cap(&self, limit: Option<u32>) -> Option<usize> {
        let max = (self.config.max_rows > 0).then_some(self.config.max_rows);
        match (limit.filter(|l| *l > 0), max) {
            (Some(l), Some(m)) => Some(l.min(m) as usize),
            (Some(l), None) => Some(l as usize),
            (None, m) => m.map(|m| m as usize),
        }
    }
}

/// Values bound to `?` markers: the first N values in map order, or none
/// when the map holds fewer values than there are markers.
fn positional_binds(sql: &str, params: &QueryParams) -> Vec<Value> {
    let markers = count_positional_markers(sql);
    if markers == 0 || params.len() < markers {
        return Vec::new();
    }
    params.values().take(markers).cloned().collect()
}

fn map_result(raw: RawResultSet, start: Instant, executed_at: chrono::DateTime<Utc>) -> QueryResult {
    let columns: Vec<ColumnDescriptor> = raw
        .columns
        .into_iter()
        .map(|c| ColumnDescriptor {
            type_code: sql_type_code(&c.type_name),
            label: c.name.clone(),
            name: c.name,
            type_name: c.type_name,
            nullable: c.nullable,
        })
        .collect();

    let rows: Vec<ResultRow> = raw
        .rows
        .into_iter()
        .map(|values| {
            columns
                .iter()
                .zip(values)
                .map(|(column, value)| (column.name.clone(), value))
                .collect()
        })
        .collect();

    QueryResult {
        row_count: rows.len(),
        columns,
        rows,
        execution_time_ms: start.elapsed().as_millis() as u64,
        executed_at,
    }
}
