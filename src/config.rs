use std::time::Duration;

use crate::errors::AppError;
use crate::jwt::JwtConfig;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_RULE_TIMEOUT_MS: u64 = 30_000;

/// Process configuration, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite URL. Without one, items live in memory.
    pub database_url: Option<String>,
    pub port: u16,
    pub jwt: JwtConfig,
    pub rule_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let port = parse_var("APP_PORT", DEFAULT_PORT)?;
        let rule_timeout_ms = parse_var("ACCESS_RULE_TIMEOUT_MS", DEFAULT_RULE_TIMEOUT_MS)?;

        Ok(Self {
            database_url,
            port,
            jwt: JwtConfig::from_env()?,
            rule_timeout: Duration::from_millis(rule_timeout_ms),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}
