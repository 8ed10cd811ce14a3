//! SQL statement validator.
//!
//! A keyword and prefix firewall for caller-supplied SQL. It is not a parser:
//! blocklisted words are matched as plain substrings anywhere in the text,
//! inside string literals and identifiers such as `created_at` too, so some
//! legitimate statements are rejected and some injections slip through.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{EngineError, EngineResult};

/// Keywords rejected in read statements.
const READ_FORBIDDEN_KEYWORDS: [&str; 14] = [
    "DROP", "DELETE", "INSERT", "UPDATE", "CREATE", "ALTER", "EXEC", "EXECUTE", "TRUNCATE",
    "GRANT", "REVOKE", "COMMIT", "ROLLBACK", "SAVEPOINT",
];

/// Keywords rejected in write statements.
const WRITE_FORBIDDEN_KEYWORDS: [&str; 7] = [
    "DROP", "DELETE", "TRUNCATE", "CREATE", "ALTER", "EXEC", "EXECUTE",
];

/// Stacked statements, comments, UNION splicing and script payloads.
static SUSPICIOUS_PATTERN: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)(;\s*\S|--|/\*|\*/|\bUNION\b|<\s*script|javascript:|vbscript:)")
});

/// Validates SQL statements against the read and write policies.
pub struct QuerySafetyValidator;

impl QuerySafetyValidator {
    /// Validates a statement submitted for a read query.
    ///
    /// The statement must start with `SELECT` or `WITH`, must not contain any
    /// blocklisted keyword and must not match the suspicious-pattern check.
    ///
    /// # Errors
    /// Returns `EngineError::PolicyViolation` naming the violated rule.
    pub fn validate_for_read(sql: &str) -> EngineResult<()> {
        let sql_upper = normalized(sql)?;

        if !(sql_upper.starts_with("SELECT") || sql_upper.starts_with("WITH")) {
            return Err(EngineError::policy("only SELECT or WITH statements are allowed").with_sql(sql));
        }
        reject_keywords(&sql_upper, &READ_FORBIDDEN_KEYWORDS, sql)?;

        let pattern = SUSPICIOUS_PATTERN
            .as_ref()
            .map_err(|e| EngineError::internal(format!("invalid suspicious-pattern regex: {}", e)))?;
        if let Some(m) = pattern.find(&sql_upper) {
            return Err(EngineError::policy(format!("suspicious pattern: {}", m.as_str().trim())).with_sql(sql));
        }
        Ok(())
    }

    /// Validates a statement submitted for an update.
    ///
    /// The statement must start with `UPDATE` or `INSERT`; an `UPDATE` needs
    /// a `WHERE` clause.
    ///
    /// # Errors
    /// Returns `EngineError::PolicyViolation` naming the violated rule.
    pub fn validate_for_write(sql: &str) -> EngineResult<()> {
        let sql_upper = normalized(sql)?;

        let is_update = sql_upper.starts_with("UPDATE");
        if !(is_update || sql_upper.starts_with("INSERT")) {
            return Err(EngineError::policy("only UPDATE or INSERT statements are allowed").with_sql(sql));
        }
        reject_keywords(&sql_upper, &WRITE_FORBIDDEN_KEYWORDS, sql)?;

        if is_update && !sql_upper.contains("WHERE") {
            return Err(EngineError::policy("UPDATE requires a WHERE clause").with_sql(sql));
        }
        Ok(())
    }
}

fn normalized(sql: &str) -> EngineResult<String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(EngineError::policy("SQL must not be empty"));
    }
    Ok(trimmed.to_uppercase())
}

fn reject_keywords(sql_upper: &str, keywords: &[&str], sql: &str) -> EngineResult<()> {
    for keyword in keywords {
        if sql_upper.contains(keyword) {
            return Err(EngineError::policy(format!("forbidden keyword: {}", keyword)).with_sql(sql));
        }
    }
    Ok(())
}
