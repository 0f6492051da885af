//! Mock identity provider for E2E tests
//!
//! Wraps a `wiremock` server that answers the realm metadata, token and
//! introspection endpoints the way the real provider does.

use crate::crypto_fixtures::{realm_public_key_b64, TestKey};
use crate::test_ids::TEST_REALM;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock identity provider serving realm [`TEST_REALM`].
pub struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    /// Start a server with nothing mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL (`KEYCLOAK_URL`).
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Underlying server, for custom mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Realm metadata path.
    pub fn realm_path() -> String {
        format!("/realms/{TEST_REALM}")
    }

    /// Token endpoint path.
    pub fn token_path() -> String {
        format!("/realms/{TEST_REALM}/protocol/openid-connect/token")
    }

    /// Introspection endpoint path.
    pub fn introspection_path() -> String {
        format!("/realms/{TEST_REALM}/protocol/openid-connect/token/introspect")
    }

    /// Publish `key` as the realm signing key.
    pub async fn mount_realm_key(&self, key: TestKey) {
        Mock::given(method("GET"))
            .and(path(Self::realm_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "realm": TEST_REALM,
                "public_key": realm_public_key_b64(key),
                "token-service": format!("{}/realms/{TEST_REALM}/protocol/openid-connect", self.uri()),
                "tokens-not-before": 0,
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer every request for `grant_type` with `body` and status 200.
    pub async fn mount_grant(&self, grant_type: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path(Self::token_path()))
            .and(body_string_contains(format!("grant_type={grant_type}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Reject every request for `grant_type` with an OAuth error payload.
    pub async fn mount_grant_error(
        &self,
        grant_type: &str,
        status: u16,
        error: &str,
        description: &str,
    ) {
        Mock::given(method("POST"))
            .and(path(Self::token_path()))
            .and(body_string_contains(format!("grant_type={grant_type}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": error,
                "error_description": description,
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of token endpoint requests received for `grant_type`.
    pub async fn grant_count(&self, grant_type: &str) -> usize {
        let needle = format!("grant_type={grant_type}");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == Self::token_path())
            .filter(|r| String::from_utf8_lossy(&r.body).contains(&needle))
            .count()
    }
}

/// Token endpoint success body.
pub fn token_response(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "token_type": "Bearer",
        "scope": "openid profile email",
    });
    if let (Some(refresh), Some(map)) = (refresh_token, body.as_object_mut()) {
        map.insert("refresh_token".to_string(), json!(refresh));
        map.insert("refresh_expires_in".to_string(), json!(1800));
    }
    body
}
