//! Configuration management for LexBridge
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Engine tunables shared by the services and the sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Age after which an unanswered `pending` engagement is expired
    pub pending_expiry: chrono::Duration,
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
    /// Smallest withdrawal a provider may request
    pub min_withdrawal_amount: i64,
    /// Platform fee withheld from each earning, in basis points
    pub platform_fee_bps: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pending_expiry: chrono::Duration::minutes(60),
            sweep_interval: Duration::from_secs(300),
            min_withdrawal_amount: 100,
            platform_fee_bps: 0,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL; the in-memory store is used when absent
    pub database_url: Option<String>,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    pub engine: EngineSettings,
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        if database_url.is_none() && environment.is_production() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .unwrap_or(5);

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let defaults = EngineSettings::default();
        let sweep_interval_secs = parse_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?;
        let pending_expiry_minutes =
            parse_or("PENDING_EXPIRY_MINUTES", defaults.pending_expiry.num_minutes())?;
        let min_withdrawal_amount = parse_or("MIN_WITHDRAWAL_AMOUNT", defaults.min_withdrawal_amount)?;
        let platform_fee_bps = parse_or("PLATFORM_FEE_BPS", defaults.platform_fee_bps)?;

        if sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SWEEP_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if pending_expiry_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "PENDING_EXPIRY_MINUTES must be greater than zero".to_string(),
            ));
        }
        if platform_fee_bps > 10_000 {
            return Err(ConfigError::InvalidValue(
                "PLATFORM_FEE_BPS cannot exceed 10000".to_string(),
            ));
        }

        Ok(Config {
            database_url,
            environment,
            port,
            db_max_connections,
            cors_allowed_origins,
            log_level,
            engine: EngineSettings {
                pending_expiry: chrono::Duration::minutes(pending_expiry_minutes),
                sweep_interval: Duration::from_secs(sweep_interval_secs),
                min_withdrawal_amount,
                platform_fee_bps,
            },
        })
    }

    /// Get database URL (useful for logging masked version)
    pub fn database_url_masked(&self) -> String {
        let Some(url) = &self.database_url else {
            return "<in-memory>".to_string();
        };
        // Mask password in database URL for logging
        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        url.clone()
    }
}
