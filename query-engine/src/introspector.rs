//! Read-only catalog lookups.
//!
//! The catalog statements are fixed per database type, so they skip the SQL
//! policy checks but share checkout, timeout and error handling with the
//! executor. A lookup that times out closes its connection.

use std::sync::Arc;
use std::time::Instant;

use common::config::EngineConfig;
use common::errors::{EngineError, EngineResult};
use common::models::TableMetadata;
use connection_pool::{catalog_for, ConnectionPoolRegistry};

pub struct MetadataIntrospector {
    registry: Arc<ConnectionPoolRegistry>,
    config: EngineConfig,
}

impl MetadataIntrospector {
    pub fn new(registry: Arc<ConnectionPoolRegistry>) -> Self {
        let config = registry.engine_config().clone();
        Self { registry, config }
    }

    /// Base-table names of a source, in catalog order.
    pub async fn list_tables(&self, source_id: &str, schema: Option<&str>) -> EngineResult<Vec<String>> {
        let start = Instant::now();
        let fail = |e: EngineError| e.with_source_id(source_id).with_elapsed(start.elapsed());

        let mut conn = self.registry.acquire_connection(source_id).await.map_err(fail)?;
        let catalog = catalog_for(conn.db_type())
            .ok_or_else(|| fail(EngineError::internal(format!("no catalog adapter for {}", conn.db_type()))))?;

        let timeout = self.config.query_timeout();
        let tables = match tokio::time::timeout(timeout, catalog.list_tables(&mut conn, schema)).await {
            Ok(tables) => tables.map_err(fail)?,
            Err(_) => {
                conn.discard().await;
                return Err(fail(EngineError::timeout(timeout)));
            }
        };

        tracing::debug!(source_id = %source_id, tables = tables.len(), "Tables listed");
        Ok(tables)
    }

    /// Columns, primary key and indexes of one table.
    pub async fn table_metadata(&self, source_id: &str, table_name: &str) -> EngineResult<TableMetadata> {
        let start = Instant::now();
        let fail = |e: EngineError| e.with_source_id(source_id).with_elapsed(start.elapsed());

        let table_name = table_name.trim();
        if table_name.is_empty() {
            return Err(fail(EngineError::configuration("table name must not be empty")));
        }

        let mut conn = self.registry.acquire_connection(source_id).await.map_err(fail)?;
        let catalog = catalog_for(conn.db_type())
            .ok_or_else(|| fail(EngineError::internal(format!("no catalog adapter for {}", conn.db_type()))))?;

        let timeout = self.config.query_timeout();
        let metadata = match tokio::time::timeout(timeout, catalog.table_metadata(&mut conn, table_name)).await {
            Ok(metadata) => metadata.map_err(fail)?,
            Err(_) => {
                conn.discard().await;
                return Err(fail(EngineError::timeout(timeout)));
            }
        };

        tracing::debug!(
            source_id = %source_id,
            table = %table_name,
            columns = metadata.columns.len(),
            indexes = metadata.indexes.len(),
            "Table metadata loaded"
        );
        Ok(metadata)
    }
}
