//! Named-placeholder templating and positional-marker scanning.
//!
//! `#{name}` placeholders are rendered as SQL literals directly into the
//! statement text. This is plain text substitution, not parameter binding:
//! string escaping is the only defense. Values that should reach the driver
//! as bound parameters belong behind `?` markers instead.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::errors::{EngineError, EngineResult};
use crate::models::QueryParams;

static PLACEHOLDER_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"#\{([^}]+)\}"));

/// Renders `#{name}` placeholders into SQL literals.
pub struct DynamicSqlTemplater;

impl DynamicSqlTemplater {
    /// Replaces every `#{name}` in `template` with the literal rendering of
    /// `params[name]`.
    ///
    /// # Errors
    /// Returns `EngineError::Configuration` naming the first placeholder that
    /// has no bound value.
    pub fn substitute(template: &str, params: &QueryParams) -> EngineResult<String> {
        let pattern = PLACEHOLDER_PATTERN
            .as_ref()
            .map_err(|e| EngineError::internal(format!("invalid placeholder regex: {}", e)))?;

        let mut missing: Option<String> = None;
        let rendered = pattern.replace_all(template, |caps: &Captures<'_>| {
            let name = caps[1].trim();
            match params.get(name) {
                Some(value) => render_literal(value),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        if let Some(name) = missing {
            return Err(EngineError::configuration(format!("no value bound for parameter: {}", name))
                .with_sql(template));
        }
        Ok(rendered.into_owned())
    }
}

/// Renders one value as a SQL literal.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => quote(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => quote(&value.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Counts `?` markers outside single-quoted string literals.
pub fn count_positional_markers(sql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in sql.chars() {
        match c {
            // A doubled quote toggles twice and leaves the state unchanged.
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}
