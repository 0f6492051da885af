//! Generated Protocol Buffer code for the Spenzy gRPC services.
//!
//! This crate contains the compiled Protocol Buffer definitions shared by
//! the auth gateway and the services it talks to.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting

// Re-export prost traits for convenience
pub use prost::Message;

// Generated protobuf modules
pub mod auth {
    //! Authentication RPCs (login, refresh, token exchange)
    tonic::include_proto!("auth");
}

pub mod expense {
    //! Expense service messages used by outbound calls
    tonic::include_proto!("expense");
}
