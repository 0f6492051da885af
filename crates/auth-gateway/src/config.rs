//! Auth gateway configuration.
//!
//! Loaded once at startup from environment variables. Identity provider
//! settings are delegated to [`IdentityProviderConfig`]. The client secret
//! is redacted in Debug output.

use common::config::{ConfigError as IdpConfigError, IdentityProviderConfig};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use thiserror::Error;

/// Default gRPC bind address.
pub const DEFAULT_GRPC_BIND_ADDRESS: &str = "0.0.0.0:50051";

/// Default category service endpoint.
pub const DEFAULT_CATEGORY_SERVICE_URL: &str = "http://localhost:50052";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Auth gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity provider settings (shared with the verifier and clients).
    pub identity_provider: IdentityProviderConfig,

    /// gRPC server bind address (default: "0.0.0.0:50051").
    pub grpc_bind_address: SocketAddr,

    /// Category service endpoint for outbound calls.
    pub category_service_url: String,

    /// Log format (`LOG_FORMAT=json` for JSON lines).
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    IdentityProvider(#[from] IdpConfigError),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let identity_provider = IdentityProviderConfig::from_vars(vars)?;

        let bind = vars
            .get("GRPC_BIND_ADDRESS")
            .map_or(DEFAULT_GRPC_BIND_ADDRESS, String::as_str);
        let grpc_bind_address = bind
            .parse()
            .map_err(|e| ConfigError::InvalidValue("GRPC_BIND_ADDRESS", format!("{bind}: {e}")))?;

        let category_service_url = vars
            .get("CATEGORY_SERVICE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CATEGORY_SERVICE_URL.to_string());
        if !category_service_url.starts_with("http://")
            && !category_service_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "CATEGORY_SERVICE_URL",
                format!("must start with http:// or https://, got '{category_service_url}'"),
            ));
        }

        let log_format = match vars.get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(v) if v == "text" || v.is_empty() => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => return Err(ConfigError::InvalidValue("LOG_FORMAT", other)),
        };

        Ok(Self {
            identity_provider,
            grpc_bind_address,
            category_service_url,
            log_format,
        })
    }
}
