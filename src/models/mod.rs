use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a position: how much to commit and how far from the
/// current price to place the limit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Limit {
    /// Buy side: quote currency to spend. Sell side: 0 means derive it.
    #[serde(default)]
    pub amount: f64,
    /// Offset from the current price, in percent
    pub percentage: f64,
}

/// A configured trading position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// Kraken pair name, e.g. "XBTUSD"
    pub name: String,
    pub buy: Limit,
    #[serde(default)]
    pub sell: Limit,
}

/// Current ask for a pair, taken from the ticker's `a` tuple
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub pair: String,
    pub ask: f64,
    pub ask_whole_lot_volume: Option<f64>,
    pub ask_lot_volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
        }
    }
}

/// An order derived from a position, ready to submit
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub pair: String,
    pub volume: f64,
    pub price: f64,
}

impl OrderRequest {
    pub fn limit(side: OrderSide, pair: &str, volume: f64, price: f64) -> Self {
        Self {
            side,
            order_type: OrderType::Limit,
            pair: pair.to_string(),
            volume,
            price,
        }
    }

    /// Price as submitted: always two decimal places
    pub fn price_param(&self) -> String {
        format!("{:.2}", self.price)
    }

    /// Volume as submitted: unrounded, fixed-point
    pub fn volume_param(&self) -> String {
        // f64's Display never switches to exponent notation
        format!("{}", self.volume)
    }
}

/// What the exchange returned for an accepted order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderAck {
    pub description: String,
    /// Empty when the order was only validated
    pub txids: Vec<String>,
}
