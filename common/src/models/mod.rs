//! Shared data models.

pub mod metadata;
pub mod monitor;
pub mod query;
pub mod source;

// Re-export commonly used types
pub use metadata::{ColumnMetadata, IndexMetadata, TableMetadata};
pub use monitor::PoolInfo;
pub use query::{sql_type_code, ColumnDescriptor, QueryParams, QueryRequest, QueryResult, ResultRow};
pub use source::{DbType, HealthStatus, SourceConfig, SourceHealth, SourceStatus};
