//! Configuration management for Conductor.
//!
//! Configuration can be set via environment variables:
//! - `OPENAI_API_KEY` - Required. API key for the OpenAI-compatible backend.
//! - `OPENAI_BASE_URL` - Optional. Backend base URL. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Model used by the built-in agents. Defaults to `gpt-4o`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_TURNS` - Optional. Tool-call rounds allowed per streamed task. Defaults to `25`.
//! - `HEARTBEAT_INTERVAL_SECS` - Optional. Streaming heartbeat period. Defaults to `15`.
//! - `REQUEST_TIMEOUT_SECS` - Optional. Workflow timeout. Defaults to `60`.
//! - `RATE_LIMIT_WINDOW_SECS` - Optional. Rate-limit window length. Defaults to `60`.
//! - `RATE_LIMIT_MAX_REQUESTS` - Optional. Requests allowed per window. Defaults to `10`.
//! - `MEMORY_ENABLED` - Optional. Attach in-memory stores to agents. Defaults to `true`.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::agent::{DEFAULT_MAX_TURNS, DEFAULT_MODEL};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Rate-limit configuration for the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 10,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API key
    pub api_key: String,

    /// Backend base URL (OpenAI-compatible)
    pub base_url: String,

    /// Model used by the built-in agents
    pub default_model: String,

    pub host: String,

    pub port: u16,

    /// Turn budget for streamed tasks
    pub max_turns: u32,

    pub heartbeat_interval: Duration,

    /// Ceiling for a whole workflow
    pub request_timeout: Duration,

    pub rate_limit: RateLimitConfig,

    pub memory_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set and
    /// `ConfigError::InvalidValue` for values that do not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration with defaults, for tests and embedding.
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: default_model.into(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_turns: DEFAULT_MAX_TURNS,
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(60),
            rate_limit: RateLimitConfig::default(),
            memory_enabled: true,
        }
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;
        let default_model = lookup("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let mut config = Self::new(api_key, default_model);

        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        config.port = parse_var(&lookup, "PORT", config.port)?;
        config.max_turns = parse_var(&lookup, "MAX_TURNS", config.max_turns)?;
        if config.max_turns == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TURNS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        config.heartbeat_interval = Duration::from_secs(parse_var(&lookup, "HEARTBEAT_INTERVAL_SECS", 15)?);
        config.request_timeout = Duration::from_secs(parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 60)?);
        config.rate_limit = RateLimitConfig {
            window: Duration::from_secs(parse_var(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?),
            max_requests: parse_var(&lookup, "RATE_LIMIT_MAX_REQUESTS", 10)?,
        };

        config.memory_enabled = lookup("MEMORY_ENABLED")
            .map(|v| parse_bool(&v).map_err(|e| ConfigError::InvalidValue("MEMORY_ENABLED".to_string(), e)))
            .transpose()?
            .unwrap_or(true);

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_turns, 25);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.rate_limit.max_requests, 10);
        assert!(config.memory_enabled);
    }

    #[test]
    fn missing_key_is_an_error() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = load(&[("OPENAI_API_KEY", "k"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "PORT"));

        let err = load(&[("OPENAI_API_KEY", "k"), ("MEMORY_ENABLED", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("MEMORY_ENABLED"));
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("OPENAI_API_KEY", "k"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
            ("MEMORY_ENABLED", "off"),
            ("REQUEST_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert!(!config.memory_enabled);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool(" Yes "), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
