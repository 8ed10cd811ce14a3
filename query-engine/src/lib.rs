//! Safe ad-hoc SQL execution and catalog introspection over registered
//! data sources.

pub mod executor;
pub mod introspector;

pub use executor::QueryExecutor;
pub use introspector::MetadataIntrospector;
