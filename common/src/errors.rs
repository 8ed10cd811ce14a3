//! Engine error taxonomy.
//!
//! Every failure surfaced by the registry, executor and introspector is an
//! [`EngineError`]. Each variant carries an [`ErrorContext`] with whatever
//! diagnostics were known at the failure point (source id, a truncated copy of
//! the SQL, elapsed time).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Longest SQL preview kept in error context and log fields.
pub const SQL_PREVIEW_CHARS: usize = 200;

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Diagnostics attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Source the operation targeted.
    pub source_id: Option<String>,
    /// Truncated SQL text.
    pub sql: Option<String>,
    /// Time spent before the failure.
    pub elapsed: Option<Duration>,
}

impl ErrorContext {
    fn is_empty(&self) -> bool {
        self.source_id.is_none() && self.sql.is_none() && self.elapsed.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::with_capacity(3);
        if let Some(id) = &self.source_id {
            parts.push(format!("source_id={}", id));
        }
        if let Some(elapsed) = self.elapsed {
            parts.push(format!("elapsed_ms={}", elapsed.as_millis()));
        }
        if let Some(sql) = &self.sql {
            parts.push(format!("sql={}", sql));
        }
        write!(f, " [{}]", parts.join(", "))
    }
}

/// Engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad, missing or unknown configuration or source id.
    #[error("configuration error: {message}{context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    /// SQL rejected by the statement policy.
    #[error("policy violation: {rule}{context}")]
    PolicyViolation { rule: String, context: ErrorContext },

    /// Network, driver or probe failure.
    #[error("connectivity error: {message}{context}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
        context: ErrorContext,
    },

    /// Execution exceeded its configured limit.
    #[error("timeout: exceeded {}ms{context}", .limit.as_millis())]
    Timeout {
        limit: Duration,
        context: ErrorContext,
    },

    /// Unexpected driver-contract violation.
    #[error("internal error: {message}{context}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn policy(rule: impl Into<String>) -> Self {
        Self::PolicyViolation {
            rule: rule.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
            source: None,
            context: ErrorContext::default(),
        }
    }

    /// Wraps a driver error, keeping it as the error source.
    pub fn driver(message: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Connectivity {
            message: format!("{}: {}", message.into(), source),
            source: Some(source),
            context: ErrorContext::default(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            limit,
            context: ErrorContext::default(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Unknown source id.
    pub fn unknown_source(id: &str) -> Self {
        Self::configuration(format!("data source not registered: {}", id)).with_source_id(id)
    }

    /// Stable machine-readable code for the request-handling layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::PolicyViolation { .. } => "POLICY_VIOLATION",
            Self::Connectivity { .. } => "CONNECTIVITY_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Configuration { context, .. }
            | Self::PolicyViolation { context, .. }
            | Self::Connectivity { context, .. }
            | Self::Timeout { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Configuration { context, .. }
            | Self::PolicyViolation { context, .. }
            | Self::Connectivity { context, .. }
            | Self::Timeout { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.context_mut().source_id = Some(id.into());
        self
    }

    /// Attaches a truncated copy of `sql`.
    pub fn with_sql(mut self, sql: &str) -> Self {
        self.context_mut().sql = Some(truncate_sql(sql));
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.context_mut().elapsed = Some(elapsed);
        self
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Shortens `sql` to at most [`SQL_PREVIEW_CHARS`] characters, collapsing
/// line breaks so the preview stays on one log line.
pub fn truncate_sql(sql: &str) -> String {
    let flat: String = sql
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= SQL_PREVIEW_CHARS {
        return flat;
    }
    let mut preview: String = flat.chars().take(SQL_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_context() {
        let err = EngineError::configuration("missing field: url");
        assert_eq!(err.to_string(), "configuration error: missing field: url");
    }

    #[test]
    fn test_display_with_context() {
        let err = EngineError::policy("forbidden keyword: DROP")
            .with_source_id("ds-1")
            .with_sql("DROP TABLE users")
            .with_elapsed(Duration::from_millis(12));
        assert_eq!(
            err.to_string(),
            "policy violation: forbidden keyword: DROP [source_id=ds-1, elapsed_ms=12, sql=DROP TABLE users]"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = EngineError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timeout: exceeded 1500ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_truncate_sql_respects_char_boundaries() {
        let sql = "SELECT '数据源' ".repeat(40);
        let preview = truncate_sql(&sql);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), SQL_PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_truncate_sql_flattens_newlines() {
        assert_eq!(truncate_sql("SELECT 1\nFROM t"), "SELECT 1 FROM t");
    }

    #[test]
    fn test_codes() {
        assert_eq!(EngineError::unknown_source("x").code(), "CONFIGURATION_ERROR");
        assert_eq!(EngineError::connectivity("down").code(), "CONNECTIVITY_ERROR");
        assert_eq!(EngineError::internal("bad").code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_driver_error_keeps_source() {
        use std::error::Error as _;
        let err = EngineError::driver("acquire failed", sqlx::Error::PoolTimedOut);
        assert!(err.source().is_some());
        assert!(err.is_connectivity());
    }
}
