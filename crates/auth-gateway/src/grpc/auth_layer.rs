//! gRPC authentication layer.
//!
//! A Tower layer that gates every RPC on the HTTP/2 request head, before the
//! handler runs or any message is read, so unary and streaming methods are
//! treated the same.
//!
//! Per call:
//! 1. Strip client-supplied identity metadata (`user_id`, `email`, `username`)
//! 2. Excluded method: forward without looking at credentials
//! 3. Missing or non-`Bearer` `authorization`: reject
//! 4. Verify the token; on success attach [`AuthContext`] and identity
//!    metadata and forward, otherwise reject
//!
//! # Security
//!
//! - Rejected calls never reach the inner service
//! - Rejection details never include the token
//! - Provider failures surface as a generic `INTERNAL`

use crate::grpc::context::{
    AuthContext, EMAIL_METADATA_KEY, IDENTITY_METADATA_KEYS, USERNAME_METADATA_KEY,
    USER_ID_METADATA_KEY,
};
use crate::grpc::exclusions::ExclusionSet;
use common::error::AuthError;
use common::verifier::TokenVerifier;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codegen::http::{self, header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tonic::Status;
use tower::{Layer, Service};

/// Tower layer for gRPC authentication.
#[derive(Clone)]
pub struct AuthLayer {
    verifier: Arc<TokenVerifier>,
    exclusions: Arc<ExclusionSet>,
}

impl AuthLayer {
    pub fn new(verifier: Arc<TokenVerifier>, exclusions: ExclusionSet) -> Self {
        Self {
            verifier,
            exclusions: Arc::new(exclusions),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            verifier: Arc::clone(&self.verifier),
            exclusions: Arc::clone(&self.exclusions),
        }
    }
}

/// Tower service produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    verifier: Arc<TokenVerifier>,
    exclusions: Arc<ExclusionSet>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        // Take the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let verifier = Arc::clone(&self.verifier);
        let exclusions = Arc::clone(&self.exclusions);

        Box::pin(async move {
            strip_identity_metadata(req.headers_mut());

            let method = req.uri().path().to_string();
            if exclusions.contains(&method) {
                tracing::debug!(target: "gateway.grpc.auth", method = %method, "Method excluded from authentication");
                return inner.call(req).await;
            }

            let Some(token) = bearer_token(req.headers()) else {
                tracing::debug!(target: "gateway.grpc.auth", method = %method, "Missing or malformed authorization");
                return Ok(Status::unauthenticated("Missing or malformed token").into_http());
            };

            let claims = match verifier.verify(token).await {
                Ok(claims) => claims,
                Err(AuthError::TokenInvalid(rejection)) => {
                    tracing::debug!(
                        target: "gateway.grpc.auth",
                        method = %method,
                        rejection = ?rejection,
                        "Token verification failed"
                    );
                    return Ok(Status::unauthenticated(format!(
                        "Token verification failed: {rejection}"
                    ))
                    .into_http());
                }
                Err(e) => {
                    tracing::error!(
                        target: "gateway.grpc.auth",
                        method = %method,
                        error = %e,
                        "Token verification could not be performed"
                    );
                    return Ok(Status::internal("Authentication failed").into_http());
                }
            };

            let context = AuthContext::from_claims(&claims);
            insert_identity_metadata(req.headers_mut(), &context);
            req.extensions_mut().insert(context);

            tracing::debug!(target: "gateway.grpc.auth", method = %method, "Request authenticated");
            inner.call(req).await
        })
    }
}

/// Extract the token from `authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

fn strip_identity_metadata(headers: &mut HeaderMap) {
    for key in IDENTITY_METADATA_KEYS {
        if headers.remove(key).is_some() {
            tracing::warn!(
                target: "gateway.grpc.auth",
                key = key,
                "Dropped client-supplied identity metadata"
            );
        }
    }
}

fn insert_identity_metadata(headers: &mut HeaderMap, context: &AuthContext) {
    let entries = [
        (USER_ID_METADATA_KEY, context.user_id()),
        (EMAIL_METADATA_KEY, context.email()),
        (USERNAME_METADATA_KEY, context.username()),
    ];

    for (key, value) in entries {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(key), value);
            }
            // Non-ASCII values stay available through AuthContext only.
            Err(_) => {
                tracing::debug!(target: "gateway.grpc.auth", key = key, "Claim not representable as metadata");
            }
        }
    }
}
