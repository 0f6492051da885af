//! JWT utilities shared across Spenzy services.
//!
//! This module provides:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - The verified [`Claims`] structure handed to request handlers
//! - [`TokenRejection`], the typed reason a token was refused
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Exactly one configured algorithm is accepted, never negotiated
//! - Every rejection renders the same generic message
//! - `sub` and `email` are redacted in Debug output

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Realm access tokens carrying roles and groups run 1-2KB; anything past
/// 8KB is rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with `iat` more than this amount in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Why a bearer token was refused.
///
/// Every variant renders the same message so callers cannot tell which
/// check failed. The variant itself is logged at debug level.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Not a structurally valid JWT.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Header `alg` differs from the realm key algorithm.
    #[error("The access token is invalid or expired")]
    AlgorithmMismatch,

    /// Signature does not verify against the realm public key.
    #[error("The access token is invalid or expired")]
    BadSignature,

    /// `exp` is in the past.
    #[error("The access token is invalid or expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("The access token is invalid or expired")]
    NotYetValid,

    /// `aud` does not name this service.
    #[error("The access token is invalid or expired")]
    AudienceMismatch,

    /// `iat` is further in the future than the clock skew allows.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// A required claim (`sub`, `exp`, `iat`, `aud`) is absent.
    #[error("The access token is invalid or expired")]
    MissingClaim,
}

impl From<&JwtError> for TokenRejection {
    fn from(err: &JwtError) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenRejection::BadSignature,
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            ErrorKind::ImmatureSignature => TokenRejection::NotYetValid,
            ErrorKind::InvalidAudience => TokenRejection::AudienceMismatch,
            ErrorKind::InvalidAlgorithm => TokenRejection::AlgorithmMismatch,
            ErrorKind::MissingRequiredClaim(_) => TokenRejection::MissingClaim,
            _ => TokenRejection::MalformedToken,
        }
    }
}

// =============================================================================
// Algorithm
// =============================================================================

/// Signing algorithm of the realm key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256 (the realm default).
    #[default]
    Rs256,
    /// Ed25519.
    EdDsa,
}

impl TokenAlgorithm {
    /// The matching `jsonwebtoken` algorithm.
    #[must_use]
    pub fn as_jwt_algorithm(self) -> Algorithm {
        match self {
            TokenAlgorithm::Rs256 => Algorithm::RS256,
            TokenAlgorithm::EdDsa => Algorithm::EdDSA,
        }
    }
}

impl FromStr for TokenAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "RS256" => Ok(TokenAlgorithm::Rs256),
            "EdDSA" => Ok(TokenAlgorithm::EdDsa),
            other => Err(format!(
                "JWT_ALGORITHM must be one of RS256, EdDSA; got '{other}'"
            )),
        }
    }
}

impl fmt::Display for TokenAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenAlgorithm::Rs256 => f.write_str("RS256"),
            TokenAlgorithm::EdDsa => f.write_str("EdDSA"),
        }
    }
}

// =============================================================================
// Claims Types
// =============================================================================

/// The `aud` claim, which the provider emits as a string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience.
    One(String),
    /// Several audiences.
    Many(Vec<String>),
}

impl Audience {
    /// Whether `client_id` is one of the audiences.
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::One(aud) => aud == client_id,
            Audience::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Verified identity claims.
///
/// Only produced by the token verifier after the signature, expiry,
/// audience and issued-at checks pass.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or service account id) - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Audience(s) the token was issued for.
    pub aud: Audience,

    /// Issuer (realm URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Email address - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Preferred username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Authorized party (client the token was issued to).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("aud", &self.aud)
            .field("iss", &self.iss)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("preferred_username", &self.preferred_username)
            .field("azp", &self.azp)
            .finish()
    }
}

impl Claims {
    /// The subject, exposed to handlers as `user_id`.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    /// Email, or an empty string when the token has none.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }

    /// Preferred username, or an empty string when the token has none.
    #[must_use]
    pub fn username(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Reject oversized tokens before any parsing happens.
///
/// # Errors
///
/// Returns `TokenRejection::TokenTooLarge` past [`MAX_JWT_SIZE_BYTES`] and
/// `TokenRejection::MalformedToken` for an empty token.
pub fn check_token_size(token: &str) -> Result<(), TokenRejection> {
    if token.is_empty() {
        return Err(TokenRejection::MalformedToken);
    }

    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(TokenRejection::TokenTooLarge);
    }

    Ok(())
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `TokenRejection::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` ahead of the local clock.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), TokenRejection> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), TokenRejection> {
    // clock_skew is bounded to MAX_CLOCK_SKEW by config
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(TokenRejection::IatTooFarInFuture);
    }

    Ok(())
}

/// Wrap the bare base64 SubjectPublicKeyInfo published by the realm in PEM armor.
///
/// Returns `None` if the key contains anything but base64 characters
/// (whitespace is ignored).
#[must_use]
pub fn realm_key_to_pem(public_key_b64: &str) -> Option<String> {
    let body: Vec<u8> = public_key_b64
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if body.is_empty()
        || !body
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
    {
        return None;
    }

    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    for line in body.chunks(64) {
        pem.push_str(std::str::from_utf8(line).ok()?);
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    Some(pem)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    fn sample_claims() -> Claims {
        Claims {
            sub: "5f1c-user".to_string(),
            exp: 1_700_003_600,
            iat: 1_700_000_000,
            aud: Audience::One("document-service".to_string()),
            iss: Some("https://sso.example.com/realms/spenzy".to_string()),
            email: Some("alice@example.com".to_string()),
            preferred_username: Some("alice".to_string()),
            azp: None,
        }
    }

    #[test]
    fn test_check_token_size() {
        assert!(check_token_size("a.b.c").is_ok());
        assert_eq!(check_token_size(""), Err(TokenRejection::MalformedToken));
        assert!(check_token_size(&"a".repeat(MAX_JWT_SIZE_BYTES)).is_ok());
        assert_eq!(
            check_token_size(&"a".repeat(MAX_JWT_SIZE_BYTES + 1)),
            Err(TokenRejection::TokenTooLarge)
        );
    }

    #[test]
    fn test_validate_iat_current_and_past() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
        assert!(validate_iat(now - 3600, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_far_future() {
        let far_future = chrono::Utc::now().timestamp() + 86400;
        assert_eq!(
            validate_iat(far_future, DEFAULT_CLOCK_SKEW),
            Err(TokenRejection::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_validate_iat_at_boundary_exact() {
        let now = 1_700_000_000_i64;

        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(TokenRejection::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_rejection_messages_are_identical() {
        let variants = [
            TokenRejection::TokenTooLarge,
            TokenRejection::MalformedToken,
            TokenRejection::AlgorithmMismatch,
            TokenRejection::BadSignature,
            TokenRejection::Expired,
            TokenRejection::NotYetValid,
            TokenRejection::AudienceMismatch,
            TokenRejection::IatTooFarInFuture,
            TokenRejection::MissingClaim,
        ];
        for variant in variants {
            assert_eq!(variant.to_string(), "The access token is invalid or expired");
        }
    }

    #[test]
    fn test_rejection_from_jsonwebtoken_error() {
        let cases = [
            (ErrorKind::InvalidSignature, TokenRejection::BadSignature),
            (ErrorKind::ExpiredSignature, TokenRejection::Expired),
            (ErrorKind::ImmatureSignature, TokenRejection::NotYetValid),
            (ErrorKind::InvalidAudience, TokenRejection::AudienceMismatch),
            (ErrorKind::InvalidAlgorithm, TokenRejection::AlgorithmMismatch),
            (
                ErrorKind::MissingRequiredClaim("exp".to_string()),
                TokenRejection::MissingClaim,
            ),
            (ErrorKind::InvalidToken, TokenRejection::MalformedToken),
        ];
        for (kind, expected) in cases {
            let err = JwtError::from(kind);
            assert_eq!(TokenRejection::from(&err), expected);
        }
    }

    #[test]
    fn test_algorithm_parse_and_display() {
        assert_eq!("RS256".parse::<TokenAlgorithm>(), Ok(TokenAlgorithm::Rs256));
        assert_eq!("EdDSA".parse::<TokenAlgorithm>(), Ok(TokenAlgorithm::EdDsa));
        assert!("none".parse::<TokenAlgorithm>().is_err());
        assert_eq!(TokenAlgorithm::Rs256.to_string(), "RS256");
        assert_eq!(TokenAlgorithm::EdDsa.as_jwt_algorithm(), Algorithm::EdDSA);
    }

    #[test]
    fn test_audience_deserializes_string_or_array() {
        let one: Audience = serde_json::from_str(r#""document-service""#).unwrap();
        assert!(one.contains("document-service"));
        assert!(!one.contains("account"));

        let many: Audience = serde_json::from_str(r#"["account","document-service"]"#).unwrap();
        assert!(many.contains("document-service"));
        assert!(many.contains("account"));
        assert!(!many.contains("expense-service"));
    }

    #[test]
    fn test_claims_debug_redacts_identity() {
        let debug_str = format!("{:?}", sample_claims());

        assert!(!debug_str.contains("5f1c-user"));
        assert!(!debug_str.contains("alice@example.com"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("alice"));
    }

    #[test]
    fn test_claims_accessors_default_to_empty() {
        let mut claims = sample_claims();
        assert_eq!(claims.user_id(), "5f1c-user");
        assert_eq!(claims.email(), "alice@example.com");
        assert_eq!(claims.username(), "alice");

        claims.email = None;
        claims.preferred_username = None;
        assert_eq!(claims.email(), "");
        assert_eq!(claims.username(), "");
    }

    #[test]
    fn test_claims_deserialize_realm_token_payload() {
        let json = r#"{
            "exp": 1700003600, "iat": 1700000000, "sub": "u1",
            "aud": ["account", "document-service"], "azp": "mobile-app",
            "preferred_username": "bob", "typ": "Bearer"
        }"#;
        let claims: Claims = serde_json::from_str(json).unwrap();

        assert_eq!(claims.user_id(), "u1");
        assert_eq!(claims.username(), "bob");
        assert_eq!(claims.email(), "");
        assert_eq!(claims.azp.as_deref(), Some("mobile-app"));
        assert!(claims.aud.contains("document-service"));
    }

    #[test]
    fn test_realm_key_to_pem_wraps_lines() {
        let body = "A".repeat(130);
        let pem = realm_key_to_pem(&body).unwrap();
        let lines: Vec<&str> = pem.lines().collect();

        assert_eq!(lines.first(), Some(&"-----BEGIN PUBLIC KEY-----"));
        assert_eq!(lines.last(), Some(&"-----END PUBLIC KEY-----"));
        assert_eq!(lines.get(1).map(|l| l.len()), Some(64));
        assert_eq!(lines.get(2).map(|l| l.len()), Some(64));
        assert_eq!(lines.get(3).map(|l| l.len()), Some(2));
    }

    #[test]
    fn test_realm_key_to_pem_ignores_whitespace() {
        let pem = realm_key_to_pem("MIIB\nIjAN Bgkq\t").unwrap();
        assert!(pem.contains("\nMIIBIjANBgkq\n"));
    }

    #[test]
    fn test_realm_key_to_pem_rejects_non_base64() {
        let multibyte = format!("a{}", "\u{e9}".repeat(40));
        assert_eq!(realm_key_to_pem(&multibyte), None);
        assert_eq!(realm_key_to_pem("not-a-key!"), None);
        assert_eq!(realm_key_to_pem("  "), None);
    }
}
