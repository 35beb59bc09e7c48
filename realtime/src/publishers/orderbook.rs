//! Order book snapshot publisher.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PublishSink;
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{DataStore, Order, Side, TradingPair};
use crate::ws::channels::{Channel, Event};

/// One resting order as shown in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Limit price.
    pub price: Decimal,
    /// Remaining amount.
    pub amount: Decimal,
}

impl From<&Order> for PriceLevel {
    fn from(order: &Order) -> Self {
        Self {
            price: order.price,
            amount: order.amount,
        }
    }
}

/// Order book snapshot for one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderbookSnapshot {
    /// Base asset symbol.
    pub base_asset: String,
    /// Quote asset symbol.
    pub quote_asset: String,
    /// Buy side, best (highest) price first.
    pub bids: Vec<PriceLevel>,
    /// Sell side, best (lowest) price first.
    pub asks: Vec<PriceLevel>,
    /// Snapshot time in epoch milliseconds.
    pub timestamp: i64,
}

/// Publishes order book snapshots on `ORDERBOOK`.
#[derive(Debug, Clone)]
pub struct OrderbookPublisher {
    store: Arc<dyn DataStore>,
    sink: PublishSink,
    clock: Arc<dyn Clock>,
}

impl OrderbookPublisher {
    /// Creates a new orderbook publisher.
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, sink: PublishSink, clock: Arc<dyn Clock>) -> Self {
        Self { store, sink, clock }
    }

    /// Builds the snapshot for a pair without publishing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn snapshot(&self, pair: &TradingPair) -> Result<OrderbookSnapshot> {
        let mut buys = self.store.open_orders(pair, Side::Buy).await?;
        let mut sells = self.store.open_orders(pair, Side::Sell).await?;
        buys.sort_by(|a, b| b.price.cmp(&a.price));
        sells.sort_by(|a, b| a.price.cmp(&b.price));

        Ok(OrderbookSnapshot {
            base_asset: pair.base_asset.clone(),
            quote_asset: pair.quote_asset.clone(),
            bids: buys.iter().map(PriceLevel::from).collect(),
            asks: sells.iter().map(PriceLevel::from).collect(),
            timestamp: self.clock.now_millis(),
        })
    }

    /// Publishes the current book for `base`/`quote`, scoped by the pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query or serialization fails.
    pub async fn publish_orderbook_update(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<OrderbookSnapshot> {
        let pair = TradingPair::new(base, quote);
        let snapshot = self.snapshot(&pair).await?;

        self.sink
            .publish(
                Channel::Orderbook,
                Event::OrderbookUpdate,
                &snapshot,
                Some(pair.params()),
            )
            .await?;

        debug!(
            pair = %pair,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Published orderbook update"
        );
        Ok(snapshot)
    }
}
