//! Auth Gateway Library
//!
//! Authentication front door for the expense-tracking gRPC services:
//!
//! - Verifies bearer tokens on every inbound RPC (Tower layer)
//! - Hands verified identity to handlers as [`grpc::AuthContext`]
//! - Serves the user-facing token grants (`auth.AuthService`)
//! - Calls downstream services with cached client-credentials tokens
//!
//! # Modules
//!
//! - [`config`] - Gateway configuration from environment
//! - [`errors`] - Error types mapped to gRPC status codes
//! - [`grpc`] - Auth layer, identity context and the auth RPC service
//! - [`services`] - Outbound service clients

pub mod config;
pub mod errors;
pub mod grpc;
pub mod services;
