//! # Auth Test Utilities
//!
//! Shared test utilities for the authentication core and gateway.
//!
//! This crate provides:
//! - Deterministic RSA fixtures (fixed keys for reproducible tests)
//! - Test token builders (`TestTokenBuilder`)
//! - A mock identity provider (`MockIdentityProvider`) on `wiremock`
//! - Fixed test identifiers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let idp = MockIdentityProvider::start().await;
//!     idp.mount_realm_key(TestKey::Primary).await;
//!
//!     let token = TestTokenBuilder::new()
//!         .for_user("u1")
//!         .expires_in(3600)
//!         .sign(TestKey::Primary);
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_idp;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_idp::*;
pub use test_ids::*;
pub use token_builders::*;
