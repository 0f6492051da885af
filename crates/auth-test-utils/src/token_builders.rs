//! Builder patterns for test tokens
//!
//! Produces realm-shaped access tokens signed with the fixture keys.

use crate::crypto_fixtures::{encoding_key, TestKey};
use crate::test_ids::{TEST_CLIENT_ID, TEST_ISSUER};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde_json::{json, Map, Value};

/// Builder for realm access tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user("u1")
///     .with_email("alice@example.com")
///     .expires_in(3600)
///     .sign(TestKey::Primary);
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
    algorithm: Algorithm,
}

impl TestTokenBuilder {
    /// Valid defaults: subject `test-user`, audience [`TEST_CLIENT_ID`], one hour lifetime.
    pub fn new() -> Self {
        let now = Utc::now();
        let claims = json!({
            "sub": "test-user",
            "aud": TEST_CLIENT_ID,
            "iss": TEST_ISSUER,
            "exp": (now + Duration::seconds(3600)).timestamp(),
            "iat": now.timestamp(),
            "email": "test-user@example.com",
            "preferred_username": "test-user",
            "azp": "mobile-app",
            "typ": "Bearer",
        });

        let claims = match claims {
            Value::Object(map) => map,
            _ => unreachable!("json! object literal"),
        };

        Self {
            claims,
            algorithm: Algorithm::RS256,
        }
    }

    /// Set the subject
    pub fn for_user(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Set the email claim
    pub fn with_email(self, email: &str) -> Self {
        self.with_claim("email", json!(email))
    }

    /// Set `preferred_username`
    pub fn with_username(self, username: &str) -> Self {
        self.with_claim("preferred_username", json!(username))
    }

    /// Set a single audience
    pub fn for_audience(self, audience: &str) -> Self {
        self.with_claim("aud", json!(audience))
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set issued-at as an offset from now (positive is future-dated)
    pub fn issued_in(self, seconds: i64) -> Self {
        let iat = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("iat", json!(iat))
    }

    /// Set `nbf` as an offset from now
    pub fn not_before_in(self, seconds: i64) -> Self {
        let nbf = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("nbf", json!(nbf))
    }

    /// Set an arbitrary claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim entirely
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Header algorithm. Must be an RSA family algorithm (e.g. `RS384`).
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }

    /// Sign with a fixture key
    pub fn sign(self, key: TestKey) -> String {
        let header = Header::new(self.algorithm);
        jsonwebtoken::encode(&header, &Value::Object(self.claims), &encoding_key(key))
            .expect("fixture token signing")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
