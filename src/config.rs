//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::gateway::GatewayConfig;

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

    /// Delivery attempts per message before dead-lettering
    pub message_max_attempts: u32,

    /// Base delay between redeliveries (scaled linearly by attempt)
    pub message_retry_delay: Duration,

    /// Audit log retention window, in days
    pub audit_retention_days: i64,

    /// Request timeout for operator gateway calls
    pub gateway_timeout: Duration,

    /// Orange Money partner API
    pub orange_api_url: String,
    pub orange_api_key: String,
    pub orange_api_secret: String,

    /// MTN MoMo open API
    pub mtn_api_url: String,
    pub mtn_api_key: String,
    pub mtn_api_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let message_max_attempts = env::var("MESSAGE_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("MESSAGE_MAX_ATTEMPTS"))?;

        let retry_delay_ms: u64 = env::var("MESSAGE_RETRY_DELAY_MS")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("MESSAGE_RETRY_DELAY_MS"))?;

        let audit_retention_days = env::var("AUDIT_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("AUDIT_RETENTION_DAYS"))?;

        let gateway_timeout_secs: u64 = env::var("GATEWAY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS"))?;

        let orange_api_url =
            env::var("ORANGE_API_URL").map_err(|_| ConfigError::MissingEnv("ORANGE_API_URL"))?;
        let orange_api_key =
            env::var("ORANGE_API_KEY").map_err(|_| ConfigError::MissingEnv("ORANGE_API_KEY"))?;
        let orange_api_secret = env::var("ORANGE_API_SECRET")
            .map_err(|_| ConfigError::MissingEnv("ORANGE_API_SECRET"))?;

        let mtn_api_url =
            env::var("MTN_API_URL").map_err(|_| ConfigError::MissingEnv("MTN_API_URL"))?;
        let mtn_api_key =
            env::var("MTN_API_KEY").map_err(|_| ConfigError::MissingEnv("MTN_API_KEY"))?;
        let mtn_api_secret =
            env::var("MTN_API_SECRET").map_err(|_| ConfigError::MissingEnv("MTN_API_SECRET"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            message_max_attempts,
            message_retry_delay: Duration::from_millis(retry_delay_ms),
            audit_retention_days,
            gateway_timeout: Duration::from_secs(gateway_timeout_secs),
            orange_api_url,
            orange_api_key,
            orange_api_secret,
            mtn_api_url,
            mtn_api_key,
            mtn_api_secret,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn orange_gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.orange_api_url.clone(),
            api_key: self.orange_api_key.clone(),
            api_secret: self.orange_api_secret.clone(),
            timeout: self.gateway_timeout,
        }
    }

    pub fn mtn_gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.mtn_api_url.clone(),
            api_key: self.mtn_api_key.clone(),
            api_secret: self.mtn_api_secret.clone(),
            timeout: self.gateway_timeout,
        }
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
