//! Runtime registry of data-source connection pools.
//!
//! Sources are registered by value from a [`common::models::SourceConfig`],
//! validated, probed and then kept alive as native `sqlx` pools until they
//! are removed or the registry shuts down.

pub mod config_validator;
pub mod connection;
pub mod drivers;
pub mod health;
pub mod pool_manager;
pub mod service;

pub use config_validator::{PoolSettings, ResolvedSource, SourceConfigValidator};
pub use connection::{DatabasePool, DriverConnection, PoolHandle, PooledConnection};
pub use drivers::{catalog_for, CatalogAdapter, FetchLimits, RawColumn, RawResultSet};
pub use health::spawn_health_monitor;
pub use pool_manager::{ConnectionPoolRegistry, ShutdownReport};
pub use service::{SourceLifecycle, SourceService};
