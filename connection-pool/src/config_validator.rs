//! Source configuration validation.
//!
//! Turns a caller-supplied [`SourceConfig`] into a [`ResolvedSource`]: text
//! fields trimmed, type parsed, driver and pool defaults filled in. The input
//! is never mutated; a rejected config leaves nothing behind.

use std::time::Duration;

use common::errors::{EngineError, EngineResult};
use common::models::{DbType, SourceConfig};
use validator::Validate;

pub const DEFAULT_MIN_POOL_SIZE: u32 = 2;
pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LEAK_DETECTION_THRESHOLD_MS: u64 = 60_000;

/// Order in which field errors are reported.
const FIELD_ORDER: [&str; 13] = [
    "id",
    "name",
    "type",
    "db_type",
    "url",
    "username",
    "secret",
    "max_pool_size",
    "connection_timeout_ms",
    "idle_timeout_ms",
    "max_lifetime_ms",
    "validation_timeout_ms",
    "leak_detection_threshold_ms",
];

/// Pool sizing and timeouts of a resolved source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_size: u32,
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub validation_timeout: Duration,
    pub leak_detection_threshold: Duration,
}

/// A validated config with every default filled in.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub config: SourceConfig,
    pub db_type: DbType,
    pub settings: PoolSettings,
}

/// Validates and normalizes source configurations.
pub struct SourceConfigValidator;

impl SourceConfigValidator {
    /// Validates `config` and returns its normalized form.
    ///
    /// # Errors
    /// Returns `EngineError::Configuration` naming the first missing or invalid field.
    pub fn validate(config: &SourceConfig) -> EngineResult<ResolvedSource> {
        let mut config = normalize(config);

        if let Err(errors) = config.validate() {
            let field_errors = errors.field_errors();
            let first = FIELD_ORDER
                .iter()
                .find_map(|field| field_errors.get(*field).map(|errs| (*field, *errs)))
                .or_else(|| {
                    field_errors
                        .iter()
                        .min_by(|a, b| a.0.cmp(b.0))
                        .map(|(field, errs)| (field.as_ref(), *errs))
                });
            let message = match first {
                Some((field, errs)) => errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("invalid field: {}", field)),
                None => errors.to_string(),
            };
            return Err(EngineError::configuration(message).with_source_id(&config.id));
        }

        let db_type = DbType::parse(&config.db_type).ok_or_else(|| {
            EngineError::configuration(format!("unsupported database type: {}", config.db_type))
                .with_source_id(&config.id)
        })?;
        config.db_type = db_type.as_str().to_string();

        let requested_driver = config
            .driver
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        match requested_driver {
            Some(driver) if !driver.eq_ignore_ascii_case(db_type.default_driver()) => {
                return Err(EngineError::configuration(format!(
                    "driver {} does not match database type {}",
                    driver, db_type
                ))
                .with_source_id(&config.id));
            }
            _ => config.driver = Some(db_type.default_driver().to_string()),
        }

        let settings = PoolSettings {
            min_size: *config.min_pool_size.get_or_insert(DEFAULT_MIN_POOL_SIZE),
            max_size: *config.max_pool_size.get_or_insert(DEFAULT_MAX_POOL_SIZE),
            connection_timeout: Duration::from_millis(
                *config.connection_timeout_ms.get_or_insert(DEFAULT_CONNECTION_TIMEOUT_MS),
            ),
            idle_timeout: Duration::from_millis(*config.idle_timeout_ms.get_or_insert(DEFAULT_IDLE_TIMEOUT_MS)),
            max_lifetime: Duration::from_millis(*config.max_lifetime_ms.get_or_insert(DEFAULT_MAX_LIFETIME_MS)),
            validation_timeout: Duration::from_millis(
                *config.validation_timeout_ms.get_or_insert(DEFAULT_VALIDATION_TIMEOUT_MS),
            ),
            leak_detection_threshold: Duration::from_millis(
                *config
                    .leak_detection_threshold_ms
                    .get_or_insert(DEFAULT_LEAK_DETECTION_THRESHOLD_MS),
            ),
        };

        if settings.min_size > settings.max_size {
            return Err(EngineError::configuration(format!(
                "min_pool_size {} exceeds max_pool_size {}",
                settings.min_size, settings.max_size
            ))
            .with_source_id(&config.id));
        }

        Ok(ResolvedSource {
            config,
            db_type,
            settings,
        })
    }
}

fn normalize(config: &SourceConfig) -> SourceConfig {
    let mut config = config.clone();
    config.id = config.id.trim().to_string();
    config.name = config.name.trim().to_string();
    config.db_type = config.db_type.trim().to_string();
    config.username = config.username.trim().to_string();

    let url = config.url.trim();
    config.url = match url.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => url[5..].to_string(),
        _ => url.to_string(),
    };
    config
}
