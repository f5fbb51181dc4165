use std::env;

use thiserror::Error;

use crate::config_env::{optional_trimmed_env, parse_u64_env, parse_usize_env};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_TEXT_API_BASE_URL: &str = "https://text.pollinations.ai";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Upstream body-size ceiling with a safety margin already subtracted.
/// A policy constant, not a provider guarantee; override via env.
const DEFAULT_MAX_AUTHENTICATED_PAYLOAD_CHARS: usize = 4_500;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub text_api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    pub max_authenticated_payload_chars: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let text_api_base_url = optional_trimmed_env("TEXT_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_TEXT_API_BASE_URL.to_string());
        if !text_api_base_url.starts_with("http://")
            && !text_api_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidConfiguration(
                "TEXT_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        let request_timeout_ms =
            parse_u64_env("TEXT_API_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "TEXT_API_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_addr: env::var("API_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            text_api_base_url,
            api_token: optional_trimmed_env("POLLINATIONS_API_TOKEN"),
            request_timeout_ms,
            max_authenticated_payload_chars: parse_usize_env(
                "MAX_AUTHENTICATED_PAYLOAD_CHARS",
                DEFAULT_MAX_AUTHENTICATED_PAYLOAD_CHARS,
            )?,
        })
    }

    /// Whether the process holds a provider credential. An environment-scoped
    /// capability, not a per-request property.
    pub fn credentials_held(&self) -> bool {
        self.api_token.is_some()
    }
}

pub fn load_dotenv() -> Result<(), String> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(format!("failed to load .env: {err}")),
    }
}
