use crate::models::{OrderRequest, OrderSide, Position};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("current price must be positive and finite, got {0}")]
    InvalidCurrentPrice(f64),

    #[error("{side} limit price for {pair} is not positive ({price})")]
    NonPositiveLimitPrice {
        pair: String,
        side: OrderSide,
        price: f64,
    },
}

/// Limit prices and volumes derived for one position
#[derive(Debug, Clone, PartialEq)]
pub struct PricedPosition {
    pub pair: String,
    pub buy_limit_price: f64,
    pub sell_limit_price: f64,
    pub buy_volume: f64,
    /// Configured sell amount, or the derived one when configured as zero
    pub sell_amount: f64,
    pub sell_volume: f64,
}

impl PricedPosition {
    pub fn buy_order(&self) -> OrderRequest {
        OrderRequest::limit(
            OrderSide::Buy,
            &self.pair,
            self.buy_volume,
            self.buy_limit_price,
        )
    }

    pub fn sell_order(&self) -> OrderRequest {
        OrderRequest::limit(
            OrderSide::Sell,
            &self.pair,
            self.sell_volume,
            self.sell_limit_price,
        )
    }
}

/// Price a position against the current ask
///
/// The buy limit sits `buy.percentage` percent below the current price and
/// the sell limit `sell.percentage` percent above it. The buy amount is in
/// quote currency, so its volume is `amount / buy_limit_price`.
///
/// A sell amount of zero is derived as
/// `(sell_limit_price / buy_limit_price) * buy.amount`, scaling the sell
/// notional by the same ratio as the price.
pub fn price_position(
    current_price: f64,
    position: &Position,
) -> Result<PricedPosition, PricingError> {
    if !current_price.is_finite() || current_price <= 0.0 {
        return Err(PricingError::InvalidCurrentPrice(current_price));
    }

    let buy_limit_price = current_price - current_price * (position.buy.percentage / 100.0);
    let sell_limit_price = current_price + current_price * (position.sell.percentage / 100.0);

    if buy_limit_price <= 0.0 {
        return Err(PricingError::NonPositiveLimitPrice {
            pair: position.name.clone(),
            side: OrderSide::Buy,
            price: buy_limit_price,
        });
    }
    if sell_limit_price <= 0.0 {
        return Err(PricingError::NonPositiveLimitPrice {
            pair: position.name.clone(),
            side: OrderSide::Sell,
            price: sell_limit_price,
        });
    }

    let buy_volume = position.buy.amount / buy_limit_price;

    let sell_amount = if position.sell.amount == 0.0 {
        (sell_limit_price / buy_limit_price) * position.buy.amount
    } else {
        position.sell.amount
    };
    let sell_volume = sell_amount / sell_limit_price;

    Ok(PricedPosition {
        pair: position.name.clone(),
        buy_limit_price,
        sell_limit_price,
        buy_volume,
        sell_amount,
        sell_volume,
    })
}
