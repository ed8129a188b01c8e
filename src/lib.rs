// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod risk;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::{DeltaClient, ExchangeGateway, FirebaseClient};
pub use crate::config::Settings;
pub use error::BotError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
