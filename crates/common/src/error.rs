//! Common error types for the authentication core.

use crate::jwt::TokenRejection;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Error payload returned by the identity provider (`error` / `error_description`).
///
/// Carried verbatim inside [`AuthError::Authentication`] so operators can see
/// exactly what the provider said without digging through logs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderErrorBody {
    /// OAuth error code (e.g. `invalid_grant`).
    pub error: String,

    /// Human-readable description, when the provider sends one.
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ProviderErrorBody {
    /// Build a payload from a bare error code.
    #[must_use]
    pub fn new(error: impl Into<String>, error_description: Option<String>) -> Self {
        Self {
            error: error.into(),
            error_description,
        }
    }
}

impl fmt::Display for ProviderErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Errors produced by the authentication core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Bearer token failed verification. Never retried.
    #[error("Token verification failed: {0}")]
    TokenInvalid(TokenRejection),

    /// The identity provider rejected a grant.
    #[error("Authentication failed: {0}")]
    Authentication(ProviderErrorBody),

    /// Network failure or timeout talking to the identity provider.
    #[error("Identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Introspection could not be performed.
    #[error("Token introspection failed: {0}")]
    Introspection(String),

    /// The identity provider answered with something we could not parse.
    #[error("Invalid identity provider response: {0}")]
    InvalidResponse(String),

    /// Required configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Whether a single immediate retry is worthwhile.
    ///
    /// Only transport-level failures qualify; a provider that actively
    /// rejected the request will reject it again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ProviderUnreachable(_))
    }
}

/// Result type alias using `AuthError`
pub type Result<T> = std::result::Result<T, AuthError>;
