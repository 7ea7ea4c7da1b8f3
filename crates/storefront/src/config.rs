// =============================================================================
// Storefront Backend - Configuration
// =============================================================================

use std::env;
use std::str::FromStr;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "127.0.0.1:7000")
    pub bind_address: String,

    /// Database URL (SQLite path)
    pub database_url: String,

    /// Connection pool size
    pub database_max_connections: u32,

    /// HMAC secret shared with the token issuer
    pub jwt_secret: String,

    /// Frontend origin allowed by CORS ("*" allows any origin)
    pub frontend_url: String,

    /// New reviews are published without moderation
    pub reviews_auto_approve: bool,

    /// Recompute every product's review aggregates after migrations
    pub reconcile_on_startup: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:7000".into()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:storefront.db".into()),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            reviews_auto_approve: parse_flag("REVIEWS_AUTO_APPROVE")?,
            reconcile_on_startup: parse_flag("RECONCILE_ON_STARTUP")?,
        })
    }

    /// Configuration for tests: in-place values, no environment lookups.
    #[cfg(test)]
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            database_url: database_url.to_string(),
            database_max_connections: 5,
            jwt_secret: "test-secret".into(),
            frontend_url: "*".into(),
            reviews_auto_approve: false,
            reconcile_on_startup: false,
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &'static str) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid(key, raw)),
        },
        Err(_) => Ok(false),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
