//! Utility functions and helpers.

pub mod sql_template;
pub mod sql_validator;

// Re-export commonly used types
pub use sql_template::{count_positional_markers, render_literal, DynamicSqlTemplater};
pub use sql_validator::QuerySafetyValidator;
