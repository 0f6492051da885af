//! Secret types for values that must never reach a log line.
//!
//! Re-exports [`secrecy`] types. `SecretString` redacts itself in `Debug`,
//! so any struct deriving `Debug` around it stays safe to trace. Values are
//! zeroized on drop.
//!
//! Use `SecretString` for:
//! - user passwords passed to the password grant
//! - the service's OAuth client secret
//! - access and refresh tokens held by the credential cache
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ClientIdentity {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let identity = ClientIdentity {
//!     client_id: "document-service".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//! assert!(!format!("{identity:?}").contains("s3cr3t"));
//! assert_eq!(identity.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
