//! Configuration for the quote collector, loaded from the environment.

use crate::error::{CollectorError, Result};
use std::path::PathBuf;

const DEFAULT_TOTAL_BUDGET: f64 = 5.50;
const DEFAULT_COST_PER_REQUEST: f64 = 0.0015;
const DEFAULT_CACHE_TTL_SECONDS: i64 = 900;
const DEFAULT_UPDATE_INTERVAL_SECONDS: u64 = 900;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Collector configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the paid backend. Required only if the paid
    /// adapter is actually invoked.
    pub bright_data_token: Option<String>,

    /// Monetary ceiling enforced against the paid backend.
    pub total_budget: f64,

    /// Charge for a single paid request (success or failure).
    pub cost_per_request: f64,

    /// Cache entry TTL.
    pub cache_ttl_seconds: i64,

    /// Collection cadence.
    pub update_interval_seconds: u64,

    /// Per-adapter request timeout.
    pub request_timeout_seconds: u64,

    /// Directory holding the cache database file and cost tracker state.
    pub data_dir: PathBuf,

    /// Logging verbosity (DEBUG / INFO / WARNING / ERROR / CRITICAL).
    pub log_level: String,
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let bright_data_token = std::env::var("BRIGHT_DATA_TOKEN").ok();

        let total_budget = std::env::var("TOTAL_BUDGET")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TOTAL_BUDGET);

        let cost_per_request = std::env::var("COST_PER_REQUEST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_COST_PER_REQUEST);

        let cache_ttl_seconds = std::env::var("CACHE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECONDS);

        let update_interval_seconds = std::env::var("UPDATE_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECONDS);

        let request_timeout_seconds = std::env::var("REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS);

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

        Ok(Self {
            bright_data_token,
            total_budget,
            cost_per_request,
            cache_ttl_seconds,
            update_interval_seconds,
            request_timeout_seconds,
            data_dir,
            log_level,
        })
    }

    /// Validate the configuration, returning a `ConfigError` for fatal
    /// startup misconfiguration (CLI exit code 1).
    pub fn validate(&self, paid_enabled: bool) -> Result<()> {
        if paid_enabled && self.bright_data_token.is_none() {
            return Err(CollectorError::config(
                "paid backend is enabled but BRIGHT_DATA_TOKEN is not set",
            ));
        }

        if self.total_budget < 0.0 {
            return Err(CollectorError::config("TOTAL_BUDGET must not be negative"));
        }

        if self.cost_per_request <= 0.0 {
            return Err(CollectorError::config(
                "COST_PER_REQUEST must be strictly positive",
            ));
        }

        if self.cache_ttl_seconds <= 0 {
            return Err(CollectorError::config(
                "CACHE_TTL_SECONDS must be strictly positive",
            ));
        }

        Ok(())
    }

    /// Path to the cache database file under `data_dir`.
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// Path to the cost tracker's JSON state file.
    ///
    /// Fixed at `logs/cost_tracking.json` per the persistence layout, not
    /// under `data_dir` (the cache and the cost ledger are deliberately
    /// kept on separate paths so a cache wipe cannot also zero spend).
    pub fn cost_tracking_path(&self) -> PathBuf {
        PathBuf::from("logs/cost_tracking.json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bright_data_token: None,
            total_budget: DEFAULT_TOTAL_BUDGET,
            cost_per_request: DEFAULT_COST_PER_REQUEST,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            update_interval_seconds: DEFAULT_UPDATE_INTERVAL_SECONDS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            data_dir: PathBuf::from("./data"),
            log_level: "INFO".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.total_budget, DEFAULT_TOTAL_BUDGET);
        assert_eq!(config.cost_per_request, DEFAULT_COST_PER_REQUEST);
        assert!(config.bright_data_token.is_none());
    }

    #[test]
    fn test_validate_missing_token_when_paid_enabled() {
        let config = Config::default();
        assert!(config.validate(true).is_err());
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_validate_negative_budget() {
        let mut config = Config::default();
        config.total_budget = -1.0;
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_cache_path_and_cost_tracking_path() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/tmp/qc-data");
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/qc-data/cache.db"));
        assert_eq!(
            config.cost_tracking_path(),
            PathBuf::from("logs/cost_tracking.json")
        );
    }
}
