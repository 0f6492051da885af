//! HTTP client for the identity provider realm.
//!
//! One long-lived [`IdentityProviderClient`] is built at startup and shared
//! (via `Arc`) by the token verifier's key cache, the auth RPC service and
//! the outbound credential cache.
//!
//! Every call is an independent form-encoded POST (or GET for the realm
//! key) with its own failure domain:
//!
//! | Call | Grant / endpoint |
//! |------|------------------|
//! | [`password_grant`](IdentityProviderClient::password_grant) | `password` |
//! | [`refresh_grant`](IdentityProviderClient::refresh_grant) | `refresh_token` |
//! | [`token_exchange`](IdentityProviderClient::token_exchange) | `urn:ietf:params:oauth:grant-type:token-exchange` |
//! | [`client_credentials_grant`](IdentityProviderClient::client_credentials_grant) | `client_credentials` |
//! | [`introspect`](IdentityProviderClient::introspect) | introspection endpoint |
//! | [`realm_public_key`](IdentityProviderClient::realm_public_key) | realm metadata |
//!
//! # Security
//!
//! - Passwords, client secrets and tokens travel as `SecretString`
//! - Requests are bounded by the configured timeout
//! - Provider error payloads are reported verbatim; request bodies never are

use crate::config::IdentityProviderConfig;
use crate::error::{AuthError, ProviderErrorBody, Result};
use crate::secret::{ExposeSecret, SecretString};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Grant type URN for OAuth 2.0 token exchange (RFC 8693).
pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const REFRESH_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:refresh_token";

/// Connect timeout, kept below the overall request timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Response Types
// =============================================================================

/// Tokens issued by a grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    /// Access token.
    pub access_token: SecretString,

    /// Refresh token. Absent for client-credentials grants on most realms.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,

    /// Refresh token lifetime in seconds.
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}

/// Result of token introspection. `active: false` is a normal answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Introspection {
    /// Whether the token is currently active.
    pub active: bool,

    #[serde(default)]
    pub sub: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub exp: Option<i64>,
}

/// Body of the token endpoint: either tokens or an OAuth error.
///
/// Some provider versions answer a rejected exchange with HTTP 200 and an
/// `error` field, so the body decides, not just the status code.
#[derive(Deserialize)]
#[serde(untagged)]
enum TokenEndpointBody {
    Tokens(TokenSet),
    Error(ProviderErrorBody),
}

#[derive(Deserialize)]
struct RealmInfo {
    public_key: String,
}

// =============================================================================
// Seams
// =============================================================================

/// Source of machine-to-machine access tokens (enables mocking).
#[async_trait]
pub trait ClientCredentialsSource: Send + Sync {
    /// Perform a client-credentials grant.
    async fn client_credentials_grant(
        &self,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<TokenSet>;
}

/// Source of the realm signing key (enables mocking).
#[async_trait]
pub trait RealmKeySource: Send + Sync {
    /// Fetch the realm's base64 SubjectPublicKeyInfo.
    async fn realm_public_key(&self) -> Result<String>;
}

// =============================================================================
// Client
// =============================================================================

/// Identity provider client.
#[derive(Debug)]
pub struct IdentityProviderClient {
    config: IdentityProviderConfig,
    http_client: reqwest::Client,
}

impl IdentityProviderClient {
    /// Build the client. Call once per process.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: IdentityProviderConfig) -> Result<Self> {
        if !config.verify_tls {
            warn!(
                target: "common.identity_provider",
                base_url = %config.base_url,
                "TLS certificate verification towards the identity provider is disabled"
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(config.http_timeout))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &IdentityProviderConfig {
        &self.config
    }

    /// Resource-owner password grant.
    ///
    /// # Errors
    ///
    /// `AuthError::Authentication` on invalid credentials,
    /// `AuthError::ProviderUnreachable` on network failure.
    #[instrument(skip_all, fields(grant = "password"))]
    pub async fn password_grant(&self, username: &str, password: &SecretString) -> Result<TokenSet> {
        self.token_request(&[
            ("grant_type", "password"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("username", username),
            ("password", password.expose_secret()),
            ("scope", "openid"),
        ])
        .await
    }

    /// Refresh-token grant.
    ///
    /// # Errors
    ///
    /// `AuthError::Authentication` if the refresh token is invalid or expired.
    #[instrument(skip_all, fields(grant = "refresh_token"))]
    pub async fn refresh_grant(&self, refresh_token: &SecretString) -> Result<TokenSet> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
        ])
        .await
    }

    /// Exchange a token issued to the source client for one scoped to this service.
    ///
    /// # Errors
    ///
    /// `AuthError::Authentication` when the provider refuses the exchange.
    #[instrument(skip_all, fields(grant = "token_exchange"))]
    pub async fn token_exchange(&self, subject_token: &SecretString) -> Result<TokenSet> {
        self.token_request(&[
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("client_id", &self.config.source_client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("subject_token", subject_token.expose_secret()),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
            ("requested_token_type", REFRESH_TOKEN_TYPE),
            ("audience", &self.config.client_id),
            ("scope", "openid"),
        ])
        .await
    }

    /// Check whether a token is still active on the provider.
    ///
    /// # Errors
    ///
    /// `AuthError::Introspection` only when the provider cannot answer.
    #[instrument(skip_all)]
    pub async fn introspect(&self, token: &SecretString) -> Result<Introspection> {
        let url = self.config.introspection_url();

        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("token", token.expose_secret()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!(target: "common.identity_provider", error = %e, "Introspection request failed");
                AuthError::Introspection(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ProviderErrorBody>(&body)
                .map_or_else(|_| format!("status {status}"), |b| b.to_string());
            warn!(target: "common.identity_provider", status = %status, "Introspection rejected");
            return Err(AuthError::Introspection(detail));
        }

        let introspection: Introspection = response.json().await.map_err(|e| {
            warn!(target: "common.identity_provider", error = %e, "Failed to parse introspection response");
            AuthError::Introspection(format!("invalid response: {e}"))
        })?;

        debug!(
            target: "common.identity_provider",
            active = introspection.active,
            "Token introspected"
        );

        Ok(introspection)
    }

    /// POST a grant to the token endpoint and decode the answer.
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let url = self.config.token_url();

        debug!(target: "common.identity_provider", url = %url, "Requesting token");

        let response = self
            .http_client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    target: "common.identity_provider",
                    error = %e,
                    timeout = e.is_timeout(),
                    "Token request failed"
                );
                AuthError::ProviderUnreachable(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::ProviderUnreachable(e.to_string()))?;

        let parsed = serde_json::from_str::<TokenEndpointBody>(&body);

        if status.is_server_error() {
            let detail = match parsed {
                Ok(TokenEndpointBody::Error(err)) => format!("status {status}: {err}"),
                _ => format!("status {status}"),
            };
            warn!(target: "common.identity_provider", status = %status, "Identity provider server error");
            return Err(AuthError::ProviderUnreachable(detail));
        }

        match parsed {
            Ok(TokenEndpointBody::Tokens(tokens)) if status.is_success() => {
                debug!(
                    target: "common.identity_provider",
                    expires_in_secs = tokens.expires_in,
                    "Token issued"
                );
                Ok(tokens)
            }
            Ok(TokenEndpointBody::Error(err)) => {
                warn!(
                    target: "common.identity_provider",
                    status = %status,
                    error = %err.error,
                    "Grant rejected by identity provider"
                );
                Err(AuthError::Authentication(err))
            }
            Ok(TokenEndpointBody::Tokens(_)) | Err(_) if status.is_client_error() => {
                warn!(target: "common.identity_provider", status = %status, "Grant rejected without error payload");
                Err(AuthError::Authentication(ProviderErrorBody::new(
                    format!("http_{}", status.as_u16()),
                    None,
                )))
            }
            Ok(TokenEndpointBody::Tokens(_)) => Err(AuthError::InvalidResponse(format!(
                "unexpected status {status}"
            ))),
            Err(e) => {
                warn!(target: "common.identity_provider", error = %e, "Failed to parse token response");
                Err(AuthError::InvalidResponse(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl ClientCredentialsSource for IdentityProviderClient {
    #[instrument(skip_all, fields(grant = "client_credentials", client_id = %client_id))]
    async fn client_credentials_grant(
        &self,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<TokenSet> {
        self.token_request(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
        ])
        .await
    }
}

#[async_trait]
impl RealmKeySource for IdentityProviderClient {
    #[instrument(skip_all)]
    async fn realm_public_key(&self) -> Result<String> {
        let url = self.config.realm_url();

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            warn!(target: "common.identity_provider", error = %e, "Failed to fetch realm key");
            AuthError::ProviderUnreachable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "common.identity_provider", status = %status, "Realm endpoint returned error");
            return Err(AuthError::ProviderUnreachable(format!(
                "realm endpoint returned {status}"
            )));
        }

        let realm: RealmInfo = response.json().await.map_err(|e| {
            warn!(target: "common.identity_provider", error = %e, "Failed to parse realm response");
            AuthError::InvalidResponse(e.to_string())
        })?;

        Ok(realm.public_key)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jwt::TokenAlgorithm;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/realms/spenzy/protocol/openid-connect/token";
    const INTROSPECT_PATH: &str = "/realms/spenzy/protocol/openid-connect/token/introspect";

    fn test_config(base_url: &str) -> IdentityProviderConfig {
        IdentityProviderConfig {
            base_url: base_url.to_string(),
            realm: "spenzy".to_string(),
            client_id: "document-service".to_string(),
            client_secret: SecretString::from("svc-secret"),
            source_client_id: "mobile-app".to_string(),
            verify_tls: true,
            http_timeout: Duration::from_millis(500),
            clock_skew: Duration::from_secs(300),
            algorithm: TokenAlgorithm::Rs256,
        }
    }

    fn client(server: &MockServer) -> IdentityProviderClient {
        IdentityProviderClient::new(test_config(&server.uri())).unwrap()
    }

    fn token_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "access-abc",
            "refresh_token": "refresh-def",
            "expires_in": 300,
            "refresh_expires_in": 1800,
            "token_type": "Bearer"
        })
    }

    #[tokio::test]
    async fn test_password_grant_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=hunter2"))
            .and(body_string_contains("client_id=document-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client(&server)
            .password_grant("alice", &SecretString::from("hunter2"))
            .await
            .unwrap();

        assert_eq!(tokens.access_token.expose_secret(), "access-abc");
        assert_eq!(
            tokens.refresh_token.as_ref().map(ExposeSecret::expose_secret),
            Some("refresh-def")
        );
        assert_eq!(tokens.expires_in, 300);
        assert_eq!(tokens.refresh_expires_in, Some(1800));
    }

    #[tokio::test]
    async fn test_password_grant_invalid_credentials_reports_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid user credentials"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .password_grant("alice", &SecretString::from("wrong"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::Authentication(ProviderErrorBody::new(
                "invalid_grant",
                Some("Invalid user credentials".to_string())
            ))
        );
        assert!(!err.to_string().contains("wrong"));
    }

    #[tokio::test]
    async fn test_refresh_grant_expired_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=stale"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token is not active"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .refresh_grant(&SecretString::from("stale"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Authentication(body) if body.error == "invalid_grant"));
    }

    #[tokio::test]
    async fn test_token_exchange_sends_exchange_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
            ))
            .and(body_string_contains("client_id=mobile-app"))
            .and(body_string_contains("audience=document-service"))
            .and(body_string_contains("subject_token=mobile-token"))
            .and(body_string_contains(
                "requested_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Arefresh_token",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client(&server)
            .token_exchange(&SecretString::from("mobile-token"))
            .await
            .unwrap();

        assert_eq!(tokens.access_token.expose_secret(), "access-abc");
    }

    #[tokio::test]
    async fn test_token_exchange_error_in_ok_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "access_denied",
                "error_description": "Client not allowed to exchange"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .token_exchange(&SecretString::from("mobile-token"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Authentication failed: access_denied: Client not allowed to exchange"
        );
    }

    #[tokio::test]
    async fn test_client_credentials_grant_without_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=category-reader"))
            .and(body_string_contains("client_secret=reader-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "svc-token",
                "expires_in": 60,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client(&server)
            .client_credentials_grant("category-reader", &SecretString::from("reader-secret"))
            .await
            .unwrap();

        assert_eq!(tokens.access_token.expose_secret(), "svc-token");
        assert!(tokens.refresh_token.is_none());
        assert_eq!(tokens.expires_in, 60);
    }

    #[tokio::test]
    async fn test_client_credentials_unauthorized_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server)
            .client_credentials_grant("svc", &SecretString::from("bad"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Authentication(body) if body.error == "http_401"));
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .password_grant("alice", &SecretString::from("pw"))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .password_grant("alice", &SecretString::from("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ProviderUnreachable(_)));
    }

    #[tokio::test]
    async fn test_unparseable_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .password_grant("alice", &SecretString::from("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_introspect_active_and_inactive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(INTROSPECT_PATH))
            .and(body_string_contains("token=live-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "u1",
                "username": "alice",
                "client_id": "mobile-app",
                "exp": 1_900_000_000_i64
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(INTROSPECT_PATH))
            .and(body_string_contains("token=revoked-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": false
            })))
            .mount(&server)
            .await;

        let idp = client(&server);

        let live = idp.introspect(&SecretString::from("live-token")).await.unwrap();
        assert!(live.active);
        assert_eq!(live.sub.as_deref(), Some("u1"));
        assert_eq!(live.username.as_deref(), Some("alice"));

        let revoked = idp
            .introspect(&SecretString::from("revoked-token"))
            .await
            .unwrap();
        assert!(!revoked.active);
        assert!(revoked.sub.is_none());
    }

    #[tokio::test]
    async fn test_introspect_unreachable() {
        let server = MockServer::start().await;
        let base = server.uri();
        drop(server);

        let idp = IdentityProviderClient::new(test_config(&base)).unwrap();
        let err = idp
            .introspect(&SecretString::from("any"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Introspection(_)));
    }

    #[tokio::test]
    async fn test_realm_public_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realms/spenzy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "realm": "spenzy",
                "public_key": "MIIBIjANBgkq",
                "token-service": "https://sso.example.com/realms/spenzy/protocol/openid-connect"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = client(&server).realm_public_key().await.unwrap();
        assert_eq!(key, "MIIBIjANBgkq");
    }

    #[tokio::test]
    async fn test_realm_public_key_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realms/spenzy"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).realm_public_key().await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderUnreachable(_)));
    }
}
