// Limit pricing module
// Turns a configured position and a current price into a buy/sell order pair

pub mod calculator;

pub use calculator::{price_position, PricedPosition, PricingError};
