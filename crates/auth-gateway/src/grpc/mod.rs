//! gRPC surface of the auth gateway.
//!
//! [`AuthLayer`] gates every inbound RPC on a verified bearer token, except
//! the methods in the [`ExclusionSet`]. [`AuthRpcService`] fronts the
//! identity provider's user-facing grants.

pub mod auth_layer;
pub mod auth_service;
pub mod context;
pub mod exclusions;

pub use auth_layer::AuthLayer;
pub use auth_service::AuthRpcService;
pub use context::{require_user_id, AuthContext, AuthenticatedRequest};
pub use exclusions::ExclusionSet;
