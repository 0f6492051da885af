//! Identity provider configuration.
//!
//! Loaded once at startup from environment variables. The client secret is
//! redacted in Debug output.

use crate::error::AuthError;
use crate::jwt::{TokenAlgorithm, DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use crate::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for every identity provider request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for the identity provider timeout.
pub const MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the identity provider realm this service trusts.
#[derive(Clone)]
pub struct IdentityProviderConfig {
    /// Provider base URL without trailing slash (e.g. `https://sso.example.com`).
    pub base_url: String,

    /// Realm name.
    pub realm: String,

    /// This service's client id. Also the audience expected in access tokens.
    pub client_id: String,

    /// This service's client secret.
    pub client_secret: SecretString,

    /// Client id that identifies the subject token during token exchange.
    pub source_client_id: String,

    /// Whether TLS certificates presented by the provider are verified.
    pub verify_tls: bool,

    /// Timeout applied to every provider request.
    pub http_timeout: Duration,

    /// Tolerance for future-dated `iat` claims.
    pub clock_skew: Duration,

    /// Signing algorithm of the realm key.
    pub algorithm: TokenAlgorithm,
}

impl fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProviderConfig")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("source_client_id", &self.source_client_id)
            .field("verify_tls", &self.verify_tls)
            .field("http_timeout", &self.http_timeout)
            .field("clock_skew", &self.clock_skew)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid identity provider URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid HTTP timeout configuration: {0}")]
    InvalidHttpTimeout(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWT algorithm configuration: {0}")]
    InvalidAlgorithm(String),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::Configuration(err.to_string())
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn bounded_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
    max: Duration,
) -> Result<Duration, String> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        format!("{name} must be a valid positive integer, got '{value_str}': {e}")
    })?;

    if value == 0 {
        return Err(format!("{name} must be greater than 0"));
    }

    if value > max.as_secs() {
        return Err(format!(
            "{name} must not exceed {} seconds, got {value}",
            max.as_secs()
        ));
    }

    Ok(Duration::from_secs(value))
}

impl IdentityProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a value
    /// is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a value
    /// is out of range.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let base_url = required(vars, "KEYCLOAK_URL")?
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(format!(
                "KEYCLOAK_URL must start with http:// or https://, got '{base_url}'"
            )));
        }

        let realm = required(vars, "KEYCLOAK_REALM")?;
        let client_id = required(vars, "KEYCLOAK_CLIENT_ID")?;
        let client_secret = SecretString::from(required(vars, "KEYCLOAK_CLIENT_SECRET")?);

        let source_client_id = vars
            .get("KEYCLOAK_SOURCE_CLIENT_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| client_id.clone());

        let verify_tls = vars
            .get("KEYCLOAK_VERIFY_SSL")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let http_timeout = bounded_seconds(
            vars,
            "IDP_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT,
            MAX_HTTP_TIMEOUT,
        )
        .map_err(ConfigError::InvalidHttpTimeout)?;

        let clock_skew = bounded_seconds(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW,
            MAX_CLOCK_SKEW,
        )
        .map_err(ConfigError::InvalidJwtClockSkew)?;

        let algorithm = match vars.get("JWT_ALGORITHM") {
            Some(value) => value.parse().map_err(ConfigError::InvalidAlgorithm)?,
            None => TokenAlgorithm::default(),
        };

        Ok(Self {
            base_url,
            realm,
            client_id,
            client_secret,
            source_client_id,
            verify_tls,
            http_timeout,
            clock_skew,
            algorithm,
        })
    }

    /// Realm metadata endpoint (publishes `public_key`).
    #[must_use]
    pub fn realm_url(&self) -> String {
        format!("{}/realms/{}", self.base_url, self.realm)
    }

    /// OAuth token endpoint for every grant type.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.realm_url())
    }

    /// Token introspection endpoint.
    #[must_use]
    pub fn introspection_url(&self) -> String {
        format!("{}/introspect", self.token_url())
    }
}
