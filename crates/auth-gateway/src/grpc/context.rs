//! Verified identity handed to RPC handlers.
//!
//! The auth layer stores an [`AuthContext`] in the request extensions after
//! verification succeeds. Handlers read it from there instead of
//! re-parsing metadata or the bearer token.
//!
//! ```rust,ignore
//! async fn list_expenses(&self, request: Request<ListExpensesRequest>) -> Result<..., Status> {
//!     let user_id = require_user_id(&request)?;
//!     ...
//! }
//! ```

use common::jwt::Claims;
use tonic::{Request, Status};

/// Metadata key carrying the verified subject.
pub const USER_ID_METADATA_KEY: &str = "user_id";

/// Metadata key carrying the verified email.
pub const EMAIL_METADATA_KEY: &str = "email";

/// Metadata key carrying the verified preferred username.
pub const USERNAME_METADATA_KEY: &str = "username";

/// Identity metadata the gateway owns. Client-supplied values are stripped.
pub const IDENTITY_METADATA_KEYS: [&str; 3] =
    [USER_ID_METADATA_KEY, EMAIL_METADATA_KEY, USERNAME_METADATA_KEY];

/// Identity established by bearer token verification.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: String,
    email: String,
    username: String,
    expires_at: i64,
}

impl AuthContext {
    /// Build from verified claims. Only the auth layer should call this.
    #[must_use]
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id().to_string(),
            email: claims.email().to_string(),
            username: claims.username().to_string(),
            expires_at: claims.exp,
        }
    }

    /// Read the context the auth layer attached to `request`.
    ///
    /// # Errors
    ///
    /// `UNAUTHENTICATED` if the request did not pass through token
    /// verification (e.g. an excluded method).
    pub fn from_request<T>(request: &Request<T>) -> Result<&AuthContext, Status> {
        request.extensions().get::<AuthContext>().ok_or_else(|| {
            tracing::debug!(target: "gateway.grpc.context", "No verified identity on request");
            Status::unauthenticated("Missing or malformed token")
        })
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Token expiry (Unix seconds).
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("user_id", &"[REDACTED]")
            .field("email", &"[REDACTED]")
            .field("username", &self.username)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Subject of the verified caller.
///
/// # Errors
///
/// `UNAUTHENTICATED` if no verified identity is attached.
pub fn require_user_id<T>(request: &Request<T>) -> Result<String, Status> {
    AuthContext::from_request(request).map(|ctx| ctx.user_id.clone())
}

/// A request payload together with its verified identity.
#[derive(Debug)]
pub struct AuthenticatedRequest<T> {
    context: AuthContext,
    payload: T,
}

impl<T> AuthenticatedRequest<T> {
    #[must_use]
    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    #[must_use]
    pub fn into_parts(self) -> (AuthContext, T) {
        (self.context, self.payload)
    }
}

impl<T> TryFrom<Request<T>> for AuthenticatedRequest<T> {
    type Error = Status;

    fn try_from(request: Request<T>) -> Result<Self, Self::Error> {
        let context = AuthContext::from_request(&request)?.clone();
        Ok(Self {
            context,
            payload: request.into_inner(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwt::Audience;

    fn claims() -> Claims {
        Claims {
            sub: "u1".to_string(),
            exp: 1_900_000_000,
            iat: 1_899_996_400,
            aud: Audience::One("document-service".to_string()),
            iss: None,
            email: Some("alice@example.com".to_string()),
            preferred_username: Some("alice".to_string()),
            azp: None,
        }
    }

    fn authenticated<T>(payload: T) -> Request<T> {
        let mut request = Request::new(payload);
        request
            .extensions_mut()
            .insert(AuthContext::from_claims(&claims()));
        request
    }

    #[test]
    fn test_context_from_claims() {
        let ctx = AuthContext::from_claims(&claims());

        assert_eq!(ctx.user_id(), "u1");
        assert_eq!(ctx.email(), "alice@example.com");
        assert_eq!(ctx.username(), "alice");
        assert_eq!(ctx.expires_at(), 1_900_000_000);
    }

    #[test]
    fn test_require_user_id() {
        let request = authenticated(());
        assert_eq!(require_user_id(&request).unwrap(), "u1");
    }

    #[test]
    fn test_require_user_id_without_context() {
        let request = Request::new(());
        let status = require_user_id(&request).unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_client_metadata_is_not_trusted() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(USER_ID_METADATA_KEY, "spoofed".parse().unwrap());

        assert!(AuthContext::from_request(&request).is_err());
    }

    #[test]
    fn test_authenticated_request() {
        let request = AuthenticatedRequest::try_from(authenticated("payload")).unwrap();

        assert_eq!(request.context().user_id(), "u1");
        assert_eq!(*request.payload(), "payload");

        let (ctx, payload) = request.into_parts();
        assert_eq!(ctx.username(), "alice");
        assert_eq!(payload, "payload");
    }

    #[test]
    fn test_debug_redacts_subject_and_email() {
        let debug = format!("{:?}", AuthContext::from_claims(&claims()));

        assert!(!debug.contains("u1"));
        assert!(!debug.contains("alice@example.com"));
    }
}
