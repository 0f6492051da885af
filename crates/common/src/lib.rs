//! Common utilities shared across Spenzy services.
//!
//! Everything in here is transport-agnostic: token verification, the
//! identity provider client and outbound credential caching. The gRPC
//! interception that uses these lives in `auth-gateway`.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identity provider configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (claims, size limits, iat validation)
pub mod jwt;

/// Module for the identity provider HTTP client
pub mod identity_provider;

/// Module for the process-wide realm public key cache
pub mod realm_key;

/// Module for local bearer token verification
pub mod verifier;

/// Module for outbound client-credentials token caching
pub mod credential_cache;
