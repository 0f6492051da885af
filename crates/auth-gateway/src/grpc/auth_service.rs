//! gRPC service for user-facing token grants.
//!
//! Implements `auth.AuthService` by forwarding each RPC to the identity
//! provider. These methods are in the default exclusion set, so callers
//! reach them without a bearer token.
//!
//! # Security
//!
//! - Passwords and tokens are wrapped in `SecretString` on arrival
//! - Provider rejections return the provider's message as `UNAUTHENTICATED`
//! - Every other failure returns a generic `INTERNAL`

use crate::errors::GatewayError;
use common::identity_provider::{IdentityProviderClient, TokenSet};
use common::secret::{ExposeSecret, SecretString};
use proto_gen::auth::{
    auth_service_server::AuthService, AuthResponse, AuthenticateRequest, ExchangeTokenRequest,
    RefreshTokenRequest,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

/// Maximum accepted username length.
const MAX_USERNAME_LENGTH: usize = 255;

/// gRPC service fronting the identity provider grants.
pub struct AuthRpcService {
    identity_provider: Arc<IdentityProviderClient>,
}

impl AuthRpcService {
    pub fn new(identity_provider: Arc<IdentityProviderClient>) -> Self {
        Self { identity_provider }
    }

    #[expect(
        clippy::result_large_err,
        reason = "GatewayError wraps the standard gRPC Status"
    )]
    fn require(value: &str, field_name: &str) -> Result<(), GatewayError> {
        if value.is_empty() {
            return Err(GatewayError::InvalidArgument(format!(
                "{field_name} is required"
            )));
        }
        Ok(())
    }
}

fn into_response(tokens: TokenSet) -> AuthResponse {
    AuthResponse {
        access_token: tokens.access_token.expose_secret().to_string(),
        refresh_token: tokens
            .refresh_token
            .map(|t| t.expose_secret().to_string())
            .unwrap_or_default(),
        expires_in: i32::try_from(tokens.expires_in).unwrap_or(i32::MAX),
    }
}

#[tonic::async_trait]
impl AuthService for AuthRpcService {
    /// Exchange username and password for tokens.
    #[instrument(skip_all)]
    async fn authenticate(
        &self,
        request: Request<AuthenticateRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        Self::require(&req.username, "username")?;
        Self::require(&req.password, "password")?;
        if req.username.len() > MAX_USERNAME_LENGTH {
            return Err(GatewayError::InvalidArgument("username is too long".to_string()).into());
        }

        let password = SecretString::from(req.password);
        let tokens = self
            .identity_provider
            .password_grant(&req.username, &password)
            .await
            .map_err(|source| GatewayError::Grant {
                operation: "Authentication failed",
                source,
            })?;

        tracing::info!(target: "gateway.grpc.auth_service", "User authenticated");
        Ok(Response::new(into_response(tokens)))
    }

    #[instrument(skip_all)]
    async fn refresh_token(
        &self,
        request: Request<RefreshTokenRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        Self::require(&req.refresh_token, "refresh_token")?;

        let refresh_token = SecretString::from(req.refresh_token);
        let tokens = self
            .identity_provider
            .refresh_grant(&refresh_token)
            .await
            .map_err(|source| GatewayError::Grant {
                operation: "Token refresh failed",
                source,
            })?;

        Ok(Response::new(into_response(tokens)))
    }

    /// Exchange a token issued to the source client for one scoped to this realm client.
    #[instrument(skip_all)]
    async fn exchange_token(
        &self,
        request: Request<ExchangeTokenRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        Self::require(&req.token, "token")?;

        let subject_token = SecretString::from(req.token);
        let tokens = self
            .identity_provider
            .token_exchange(&subject_token)
            .await
            .map_err(|source| GatewayError::Grant {
                operation: "Token exchange failed",
                source,
            })?;

        Ok(Response::new(into_response(tokens)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auth_test_utils::mock_idp::{token_response, MockIdentityProvider};
    use auth_test_utils::test_ids::{
        TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_REALM, TEST_SOURCE_CLIENT_ID,
    };
    use common::config::IdentityProviderConfig;
    use common::jwt::TokenAlgorithm;
    use std::time::Duration;
    use tonic::Code;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn config(base_url: String) -> IdentityProviderConfig {
        IdentityProviderConfig {
            base_url,
            realm: TEST_REALM.to_string(),
            client_id: TEST_CLIENT_ID.to_string(),
            client_secret: SecretString::from(TEST_CLIENT_SECRET),
            source_client_id: TEST_SOURCE_CLIENT_ID.to_string(),
            verify_tls: true,
            http_timeout: Duration::from_secs(2),
            clock_skew: Duration::from_secs(300),
            algorithm: TokenAlgorithm::Rs256,
        }
    }

    async fn service() -> (MockIdentityProvider, AuthRpcService) {
        let idp = MockIdentityProvider::start().await;
        let client = IdentityProviderClient::new(config(idp.uri())).unwrap();
        (idp, AuthRpcService::new(Arc::new(client)))
    }

    #[tokio::test]
    async fn test_authenticate_returns_provider_tokens() {
        let (idp, service) = service().await;
        idp.mount_grant("password", token_response("access-1", Some("refresh-1"), 300))
            .await;

        let response = service
            .authenticate(Request::new(AuthenticateRequest {
                username: "alice".to_string(),
                password: "pw".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.access_token, "access-1");
        assert_eq!(response.refresh_token, "refresh-1");
        assert_eq!(response.expires_in, 300);
    }

    #[tokio::test]
    async fn test_authenticate_invalid_credentials() {
        let (idp, service) = service().await;
        idp.mount_grant_error("password", 401, "invalid_grant", "Invalid user credentials")
            .await;

        let status = service
            .authenticate(Request::new(AuthenticateRequest {
                username: "alice".to_string(),
                password: "wrong".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "Invalid user credentials");
    }

    #[tokio::test]
    async fn test_authenticate_requires_fields() {
        let (idp, service) = service().await;

        let status = service
            .authenticate(Request::new(AuthenticateRequest {
                username: String::new(),
                password: "pw".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "username is required");
        assert_eq!(idp.grant_count("password").await, 0);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_long_username() {
        let (idp, service) = service().await;

        let status = service
            .authenticate(Request::new(AuthenticateRequest {
                username: "a".repeat(MAX_USERNAME_LENGTH + 1),
                password: "pw".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "username is too long");
        assert_eq!(idp.grant_count("password").await, 0);
    }

    #[tokio::test]
    async fn test_refresh_token_requires_token() {
        let (_idp, service) = service().await;

        let status = service
            .refresh_token(Request::new(RefreshTokenRequest {
                refresh_token: String::new(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "refresh_token is required");
    }

    #[tokio::test]
    async fn test_authenticate_provider_down_is_internal() {
        let (idp, service) = service().await;
        Mock::given(method("POST"))
            .and(path(MockIdentityProvider::token_path()))
            .respond_with(ResponseTemplate::new(503))
            .mount(idp.server())
            .await;

        let status = service
            .authenticate(Request::new(AuthenticateRequest {
                username: "alice".to_string(),
                password: "pw".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Authentication failed");
    }

    #[tokio::test]
    async fn test_refresh_token() {
        let (idp, service) = service().await;
        Mock::given(method("POST"))
            .and(path(MockIdentityProvider::token_path()))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_response("access-2", Some("refresh-2"), 300)),
            )
            .expect(1)
            .mount(idp.server())
            .await;

        let response = service
            .refresh_token(Request::new(RefreshTokenRequest {
                refresh_token: "refresh-1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.access_token, "access-2");
        assert_eq!(response.refresh_token, "refresh-2");
    }

    #[tokio::test]
    async fn test_refresh_token_expired() {
        let (idp, service) = service().await;
        idp.mount_grant_error("refresh_token", 400, "invalid_grant", "Token is not active")
            .await;

        let status = service
            .refresh_token(Request::new(RefreshTokenRequest {
                refresh_token: "stale".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "Token is not active");
    }

    #[tokio::test]
    async fn test_exchange_token_without_refresh_token() {
        let (idp, service) = service().await;
        Mock::given(method("POST"))
            .and(path(MockIdentityProvider::token_path()))
            .and(body_string_contains("subject_token=mobile-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_response("exchanged", None, 60)),
            )
            .mount(idp.server())
            .await;

        let response = service
            .exchange_token(Request::new(ExchangeTokenRequest {
                token: "mobile-token".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.access_token, "exchanged");
        assert!(response.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_token_malformed_response_is_internal() {
        let (idp, service) = service().await;
        Mock::given(method("POST"))
            .and(path(MockIdentityProvider::token_path()))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(idp.server())
            .await;

        let status = service
            .exchange_token(Request::new(ExchangeTokenRequest {
                token: "mobile-token".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Token exchange failed");
    }

    #[test]
    fn test_expires_in_saturates() {
        let tokens = TokenSet {
            access_token: SecretString::from("a"),
            refresh_token: None,
            expires_in: u64::MAX,
            refresh_expires_in: None,
        };

        assert_eq!(into_response(tokens).expires_in, i32::MAX);
    }
}
