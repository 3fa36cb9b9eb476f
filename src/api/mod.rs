pub mod kraken;

pub use kraken::{KrakenClient, KrakenError};

use crate::models::{OrderAck, OrderRequest, Quote};

/// Source of current prices
#[allow(async_fn_in_trait)]
pub trait TickerSource {
    /// Current ask for a pair
    async fn fetch_quote(&self, pair: &str) -> Result<Quote, KrakenError>;
}

/// Destination for limit orders
#[allow(async_fn_in_trait)]
pub trait OrderGateway {
    async fn add_order(&self, order: &OrderRequest) -> Result<OrderAck, KrakenError>;
}
