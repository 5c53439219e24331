//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cdc::AckMode;
use crate::ledger::RetryPolicy;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    /// Database connection URL; without it the file store and in-memory
    /// audit log are used
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// JSON document backing the system account directory
    pub system_accounts_file: PathBuf,

    pub ledger_max_attempts: u32,
    pub ledger_retry_base: Duration,
    pub ledger_retry_max: Duration,

    pub cdc_enabled: bool,
    pub cdc_ack_mode: AckMode,

    /// Minor units at or above which a transfer is flagged
    pub large_transfer_threshold: u64,

    pub suspense_monitor_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("PORT", 3000)?;
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "text".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10)?;

        let system_accounts_file = env::var("SYSTEM_ACCOUNTS_FILE")
            .unwrap_or_else(|_| "data/system-accounts.json".to_string())
            .into();

        let ledger_max_attempts: u32 = parse_var("LEDGER_MAX_ATTEMPTS", 3)?;
        if ledger_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("LEDGER_MAX_ATTEMPTS"));
        }
        let ledger_retry_base = Duration::from_millis(parse_var("LEDGER_RETRY_BASE_MS", 100)?);
        let ledger_retry_max = Duration::from_millis(parse_var("LEDGER_RETRY_MAX_MS", 2000)?);

        let cdc_enabled = parse_var("CDC_ENABLED", true)?;
        let cdc_ack_mode = env::var("CDC_ACK_MODE")
            .unwrap_or_else(|_| "manual".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CDC_ACK_MODE"))?;

        let large_transfer_threshold = parse_var("LARGE_TRANSFER_THRESHOLD", 100_000_000)?;
        let suspense_monitor_interval =
            Duration::from_secs(parse_var("SUSPENSE_MONITOR_INTERVAL_SECS", 300)?);
        if suspense_monitor_interval.is_zero() {
            return Err(ConfigError::InvalidValue("SUSPENSE_MONITOR_INTERVAL_SECS"));
        }

        let config = Self {
            host,
            port,
            environment,
            log_format,
            database_url,
            database_max_connections,
            system_accounts_file,
            ledger_max_attempts,
            ledger_retry_base,
            ledger_retry_max,
            cdc_enabled,
            cdc_ack_mode,
            large_transfer_threshold,
            suspense_monitor_interval,
        };

        // Production keeps the directory and audit trail in PostgreSQL
        if config.is_production() && config.database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        Ok(config)
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ledger_max_attempts,
            base_delay: self.ledger_retry_base,
            max_delay: self.ledger_retry_max,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
