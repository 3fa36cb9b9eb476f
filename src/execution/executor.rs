use crate::api::{KrakenError, OrderGateway, TickerSource};
use crate::models::{OrderSide, Position};
use crate::pricing::{price_position, PricingError};
use serde::Deserialize;
use thiserror::Error;

/// What to do when a price fetch, pricing step or order submission fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and carry on. Nothing already submitted is undone.
    #[default]
    BestEffort,
    /// Stop the run at the first failure
    FailFast,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to fetch price for {pair}: {source}")]
    Quote {
        pair: String,
        #[source]
        source: KrakenError,
    },

    #[error("failed to price {pair}: {source}")]
    Pricing {
        pair: String,
        #[source]
        source: PricingError,
    },

    #[error("{side} order for {pair} failed: {source}")]
    Order {
        pair: String,
        side: OrderSide,
        #[source]
        source: KrakenError,
    },
}

/// Tally of one pass over the configured positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub positions_priced: usize,
    pub positions_skipped: usize,
    pub orders_placed: usize,
    pub orders_failed: usize,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.positions_skipped > 0 || self.orders_failed > 0
    }
}

/// Places one buy and one sell limit order per position, strictly in order
pub struct GridExecutor<'a, C> {
    client: &'a C,
    policy: FailurePolicy,
}

impl<'a, C> GridExecutor<'a, C>
where
    C: TickerSource + OrderGateway,
{
    pub fn new(client: &'a C, policy: FailurePolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn run(&self, positions: &[Position]) -> Result<RunReport, ExecutionError> {
        let mut report = RunReport::default();

        for position in positions {
            self.run_position(position, &mut report).await?;
        }

        Ok(report)
    }

    async fn run_position(
        &self,
        position: &Position,
        report: &mut RunReport,
    ) -> Result<(), ExecutionError> {
        let pair = position.name.as_str();

        // No quote, no orders: pricing against a missing ask is meaningless
        let quote = match self.client.fetch_quote(pair).await {
            Ok(quote) => quote,
            Err(source) => {
                report.positions_skipped += 1;
                return self.handle(ExecutionError::Quote {
                    pair: pair.to_string(),
                    source,
                });
            }
        };

        let priced = match price_position(quote.ask, position) {
            Ok(priced) => priced,
            Err(source) => {
                report.positions_skipped += 1;
                return self.handle(ExecutionError::Pricing {
                    pair: pair.to_string(),
                    source,
                });
            }
        };
        report.positions_priced += 1;

        tracing::info!(
            pair,
            ask = quote.ask,
            buy_price = priced.buy_limit_price,
            buy_volume = priced.buy_volume,
            sell_price = priced.sell_limit_price,
            sell_volume = priced.sell_volume,
            sell_amount = priced.sell_amount,
            "Priced position"
        );

        // Buy and sell are independent: a failed buy does not stop the sell
        for order in [priced.buy_order(), priced.sell_order()] {
            match self.client.add_order(&order).await {
                Ok(ack) => {
                    report.orders_placed += 1;
                    tracing::info!(
                        pair,
                        side = %order.side,
                        price = %order.price_param(),
                        volume = %order.volume_param(),
                        txids = ?ack.txids,
                        "✓ {}",
                        ack.description
                    );
                }
                Err(source) => {
                    report.orders_failed += 1;
                    self.handle(ExecutionError::Order {
                        pair: pair.to_string(),
                        side: order.side,
                        source,
                    })?;
                }
            }
        }

        Ok(())
    }

    fn handle(&self, error: ExecutionError) -> Result<(), ExecutionError> {
        match self.policy {
            FailurePolicy::BestEffort => {
                tracing::error!("{}", error);
                Ok(())
            }
            FailurePolicy::FailFast => Err(error),
        }
    }
}
