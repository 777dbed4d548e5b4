//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// How long a STARTED idempotency record blocks other callers
    pub idempotency_lease: Duration,

    /// Outbox poll interval when the previous poll found nothing
    pub outbox_poll_interval: Duration,

    /// Maximum events claimed per outbox batch
    pub outbox_batch_size: i64,

    /// Failed publish attempts before an event is dead-lettered
    pub outbox_max_retries: i32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", "10")?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_env("PORT", "3000")?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let idempotency_lease =
            Duration::from_secs(parse_env("IDEMPOTENCY_LEASE_SECONDS", "30")?);

        let outbox_poll_interval =
            Duration::from_millis(parse_env("OUTBOX_POLL_INTERVAL_MS", "200")?);

        let outbox_batch_size: i64 = parse_env("OUTBOX_BATCH_SIZE", "50")?;
        if outbox_batch_size <= 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_BATCH_SIZE"));
        }

        let outbox_max_retries: i32 = parse_env("OUTBOX_MAX_RETRIES", "5")?;
        if outbox_max_retries <= 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_MAX_RETRIES"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            idempotency_lease,
            outbox_poll_interval,
            outbox_batch_size,
            outbox_max_retries,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_env<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
