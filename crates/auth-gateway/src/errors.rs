//! Auth gateway error types.
//!
//! Every error converts into a `tonic::Status`. Messages returned to
//! clients are generic where the cause is internal; details are logged
//! server-side.

use common::credential_cache::{CredentialError, CredentialRejection};
use common::error::AuthError;
use thiserror::Error;
use tonic::{Code, Status};

/// Auth gateway error type.
///
/// Maps to gRPC status codes:
/// - `InvalidArgument`: `INVALID_ARGUMENT`
/// - `Grant`: `UNAUTHENTICATED` when the provider rejected it, else `INTERNAL`
/// - `Credential`, `Internal`, `Config`: `INTERNAL`
/// - `Downstream`: the downstream status, unchanged
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request is missing a required field.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A user-facing identity provider grant failed. `operation` is the
    /// message returned to the client for non-rejection failures.
    #[error("{operation}: {source}")]
    Grant {
        operation: &'static str,
        #[source]
        source: AuthError,
    },

    /// Outbound credential could not be obtained.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// A downstream gRPC call failed.
    #[error("Downstream call failed: {0}")]
    Downstream(Status),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        GatewayError::Downstream(status)
    }
}

impl CredentialRejection for GatewayError {
    fn is_unauthenticated(&self) -> bool {
        matches!(self, GatewayError::Downstream(status) if status.code() == Code::Unauthenticated)
    }
}

impl From<GatewayError> for Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidArgument(msg) => Status::invalid_argument(msg),
            GatewayError::Grant {
                source: AuthError::Authentication(body),
                ..
            } => {
                tracing::debug!(target: "gateway.errors", error = %body.error, "Grant rejected");
                Status::unauthenticated(body.error_description.unwrap_or(body.error))
            }
            GatewayError::Grant { operation, source } => {
                tracing::error!(target: "gateway.errors", error = %source, "{operation}");
                Status::internal(operation)
            }
            GatewayError::Downstream(status) => status,
            GatewayError::Credential(e) => {
                tracing::error!(target: "gateway.errors", error = %e, "Outbound credential failure");
                Status::internal("Internal error")
            }
            GatewayError::Config(msg) | GatewayError::Internal(msg) => {
                tracing::error!(target: "gateway.errors", error = %msg, "Internal error");
                Status::internal("Internal error")
            }
        }
    }
}
