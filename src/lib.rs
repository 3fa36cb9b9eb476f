// Core modules
pub mod api;
pub mod execution;
pub mod models;
pub mod pricing;
pub mod settings;

// Re-export commonly used types
pub use api::{KrakenClient, KrakenError, OrderGateway, TickerSource};
pub use execution::{FailurePolicy, GridExecutor, RunReport};
pub use models::*;
pub use settings::{Credentials, Settings};
