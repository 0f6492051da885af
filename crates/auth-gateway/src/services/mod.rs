//! Outbound service clients.

pub mod category_client;

pub use category_client::{default_categories, CategoryClient};
