//! Relay configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `OUTBOX_*` environment variables. Durations are carried in milliseconds so
//! the file and environment forms stay plain integers.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::relay::RetryPolicy;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "OUTBOX_";

/// Configuration error type.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Externally configurable knobs of the relay and the idempotency cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Shared SQLite database file holding all three stores.
    pub database_path: PathBuf,
    /// Value of the `source` envelope field and `event-source` header.
    pub source: String,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Number of dispatcher threads.
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// How long a claim stays valid before another dispatcher may take it over.
    pub lease_timeout_ms: u64,
    pub reservation_ttl_ms: u64,
    pub response_ttl_ms: u64,
    /// How long a duplicate waits for an in-flight owner to complete.
    pub idempotency_wait_ms: u64,
    /// Age after which PROCESSED rows are pruned.
    pub processed_retention_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("outbox.db"),
            source: "outbox-relay".to_string(),
            log_level: "info".to_string(),
            workers: 1,
            poll_interval_ms: 1_000,
            batch_size: 100,
            max_retries: 5,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
            lease_timeout_ms: 30_000,
            reservation_ttl_ms: 30_000,
            response_ttl_ms: 3_600_000,
            idempotency_wait_ms: 5_000,
            processed_retention_ms: 7 * 24 * 3_600_000,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific JSON file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `OUTBOX_*` variables from the process environment.
    pub fn load_from_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(path) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(source) = var("SOURCE") {
            self.source = source;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        parse_into(&var, "WORKERS", &mut self.workers)?;
        parse_into(&var, "POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        parse_into(&var, "BATCH_SIZE", &mut self.batch_size)?;
        parse_into(&var, "MAX_RETRIES", &mut self.max_retries)?;
        parse_into(&var, "BACKOFF_BASE_MS", &mut self.backoff_base_ms)?;
        parse_into(&var, "BACKOFF_MULTIPLIER", &mut self.backoff_multiplier)?;
        parse_into(&var, "MAX_BACKOFF_MS", &mut self.max_backoff_ms)?;
        parse_into(&var, "LEASE_TIMEOUT_MS", &mut self.lease_timeout_ms)?;
        parse_into(&var, "RESERVATION_TTL_MS", &mut self.reservation_ttl_ms)?;
        parse_into(&var, "RESPONSE_TTL_MS", &mut self.response_ttl_ms)?;
        parse_into(&var, "IDEMPOTENCY_WAIT_MS", &mut self.idempotency_wait_ms)?;
        parse_into(&var, "PROCESSED_RETENTION_MS", &mut self.processed_retention_ms)?;
        Ok(())
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.lease_timeout_ms == 0 || self.reservation_ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "lease_timeout_ms and reservation_ttl_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_backoff(mut self, base: Duration, multiplier: f64, max: Duration) -> Self {
        self.backoff_base_ms = millis(base);
        self.backoff_multiplier = multiplier;
        self.max_backoff_ms = millis(max);
        self
    }

    pub fn with_lease_timeout(mut self, lease: Duration) -> Self {
        self.lease_timeout_ms = millis(lease);
        self
    }

    pub fn with_idempotency_ttls(mut self, reservation: Duration, response: Duration) -> Self {
        self.reservation_ttl_ms = millis(reservation);
        self.response_ttl_ms = millis(response);
        self
    }

    pub fn with_idempotency_wait(mut self, wait: Duration) -> Self {
        self.idempotency_wait_ms = millis(wait);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_millis(self.reservation_ttl_ms)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_millis(self.response_ttl_ms)
    }

    pub fn idempotency_wait(&self) -> Duration {
        Duration::from_millis(self.idempotency_wait_ms)
    }

    pub fn processed_retention(&self) -> Duration {
        Duration::from_millis(self.processed_retention_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base: Duration::from_millis(self.backoff_base_ms),
            multiplier: self.backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_into<T, F>(var: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(key) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: format!("{ENV_PREFIX}{key}"),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.response_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn env_overrides_defaults() {
        let mut config = RelayConfig::default();
        config
            .apply_env(lookup(&[
                ("OUTBOX_MAX_RETRIES", "3"),
                ("OUTBOX_POLL_INTERVAL_MS", "250"),
                ("OUTBOX_DATABASE_PATH", "/tmp/relay.db"),
            ]))
            .unwrap();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.database_path, PathBuf::from("/tmp/relay.db"));
    }

    #[test]
    fn env_rejects_garbage() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_env(lookup(&[("OUTBOX_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("OUTBOX_BATCH_SIZE"));
    }

    #[test]
    fn file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch_size": 7, "backoff_multiplier": 3.0}}"#).unwrap();

        let config = RelayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.backoff_multiplier, 3.0);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let config = RelayConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let policy = RelayConfig::default()
            .with_max_retries(3)
            .with_backoff(Duration::from_millis(10), 2.0, Duration::from_millis(50))
            .retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_millis(50));
    }
}
