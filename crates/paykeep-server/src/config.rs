use std::env;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub api_token: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr =
            env_or_default("PAYKEEP_BIND_ADDR", "127.0.0.1:8470");
        let database_path =
            env_or_default("PAYKEEP_DB_PATH", "paykeep-server.db");
        let api_token = env::var("PAYKEEP_API_TOKEN")
            .map_err(|_| ConfigError::MissingVar("PAYKEEP_API_TOKEN"))?;
        let api_token = api_token.trim().to_string();
        if api_token.is_empty() {
            return Err(ConfigError::Invalid(
                "PAYKEEP_API_TOKEN must not be empty".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            api_token,
        })
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_token() {
        let config = AppConfig {
            bind_addr: "127.0.0.1:8470".to_string(),
            database_path: ":memory:".to_string(),
            api_token: "super-secret".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
