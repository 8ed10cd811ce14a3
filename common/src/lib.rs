//! Shared building blocks for the data-source engine.
//!
//! - `errors`: the engine-wide error taxonomy
//! - `config`: engine-wide settings loaded from the environment
//! - `models`: source configs, query results, catalog metadata, pool snapshots
//! - `utils`: SQL policy checks and named-placeholder templating
//! - `telemetry`: tracing subscriber bootstrap

pub mod config;
pub mod errors;
pub mod models;
pub mod telemetry;
pub mod utils;
