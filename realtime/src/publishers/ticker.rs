//! Ticker statistics publisher.
//!
//! Statistics are computed over the trailing 24 hours of trades.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PublishSink;
use crate::clock::Clock;
use crate::error::{FeedError, Result};
use crate::store::{DataStore, Side, Trade, TradingPair};
use crate::ws::channels::{Channel, Event};

/// Ticker statistics for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerSnapshot {
    /// Base asset symbol.
    pub base_asset: String,
    /// Quote asset symbol.
    pub quote_asset: String,
    /// Price of the newest trade in the window.
    pub last_price: Option<Decimal>,
    /// Highest open buy price.
    pub best_bid: Option<Decimal>,
    /// Lowest open sell price.
    pub best_ask: Option<Decimal>,
    /// Sum of traded amounts in the window.
    pub volume_24h: Decimal,
    /// Percentage change from the oldest to the newest trade in the window.
    pub change_24h: f64,
    /// Snapshot time in epoch milliseconds.
    pub timestamp: i64,
}

/// Returns `(newest - oldest) / oldest * 100` for trades sorted oldest
/// first, or zero when there is nothing to compare against or the result
/// does not fit in a `Decimal`.
#[must_use]
pub fn percent_change(trades: &[Trade]) -> f64 {
    let (Some(oldest), Some(newest)) = (trades.first(), trades.last()) else {
        return 0.0;
    };
    if oldest.price.is_zero() {
        return 0.0;
    }

    newest
        .price
        .checked_sub(oldest.price)
        .and_then(|delta| delta.checked_div(oldest.price))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .and_then(|pct| pct.to_f64())
        .unwrap_or(0.0)
}

/// Sums traded amounts.
///
/// # Errors
///
/// Returns [`FeedError::Overflow`] if the total exceeds `Decimal::MAX`.
pub fn total_volume(trades: &[Trade]) -> Result<Decimal> {
    trades
        .iter()
        .try_fold(Decimal::ZERO, |acc, t| acc.checked_add(t.amount))
        .ok_or_else(|| FeedError::Overflow("24h volume".to_string()))
}

/// Publishes ticker statistics on `TICKER`.
#[derive(Debug, Clone)]
pub struct TickerPublisher {
    store: Arc<dyn DataStore>,
    sink: PublishSink,
    clock: Arc<dyn Clock>,
}

impl TickerPublisher {
    /// Creates a new ticker publisher.
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, sink: PublishSink, clock: Arc<dyn Clock>) -> Self {
        Self { store, sink, clock }
    }

    /// Computes ticker statistics for a pair without publishing them.
    ///
    /// # Errors
    ///
    /// Returns an error if a store query fails or the volume overflows.
    pub async fn snapshot(&self, pair: &TradingPair) -> Result<TickerSnapshot> {
        let now = self.clock.now();
        let mut trades = self.store.trades_since(pair, now - Duration::hours(24)).await?;
        trades.sort_by_key(|t| t.created_at);

        let best_bid = self
            .store
            .open_orders(pair, Side::Buy)
            .await?
            .iter()
            .map(|o| o.price)
            .max();
        let best_ask = self
            .store
            .open_orders(pair, Side::Sell)
            .await?
            .iter()
            .map(|o| o.price)
            .min();

        let volume_24h = total_volume(&trades)?;

        Ok(TickerSnapshot {
            base_asset: pair.base_asset.clone(),
            quote_asset: pair.quote_asset.clone(),
            last_price: trades.last().map(|t| t.price),
            best_bid,
            best_ask,
            volume_24h,
            change_24h: percent_change(&trades),
            timestamp: now.timestamp_millis(),
        })
    }

    /// Publishes ticker statistics for `base`/`quote`, scoped by the pair.
    ///
    /// # Errors
    ///
    /// Returns an error if a store query or serialization fails.
    pub async fn publish_ticker_data(&self, base: &str, quote: &str) -> Result<TickerSnapshot> {
        let pair = TradingPair::new(base, quote);
        let snapshot = self.snapshot(&pair).await?;

        self.sink
            .publish(
                Channel::Ticker,
                Event::TickerUpdate,
                &snapshot,
                Some(pair.params()),
            )
            .await?;

        debug!(pair = %pair, change = snapshot.change_24h, "Published ticker update");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publishers::testing::{next_event, Harness};
    use crate::store::fixtures::{dec, order, trade};
    use crate::ws::channels::Params;

    #[test]
    fn test_percent_change_empty() {
        assert_eq!(percent_change(&[]), 0.0);
    }

    #[test]
    fn test_percent_change_zero_base() {
        let pair = TradingPair::new("A", "B");
        let at = chrono::Utc::now();
        let trades = [trade("t1", &pair, "0", at), trade("t2", &pair, "5", at)];
        assert_eq!(percent_change(&trades), 0.0);
    }

    #[test]
    fn test_percent_change_out_of_range() {
        let pair = TradingPair::new("A", "B");
        let at = chrono::Utc::now();
        let trades = [
            trade("t1", &pair, "0.0001", at),
            trade("t2", &pair, &Decimal::MAX.to_string(), at),
        ];
        assert_eq!(percent_change(&trades), 0.0);
    }

    #[test]
    fn test_total_volume_overflow() {
        let pair = TradingPair::new("A", "B");
        let at = chrono::Utc::now();
        let mut big = trade("t1", &pair, "1", at);
        big.amount = Decimal::MAX;
        let trades = [big.clone(), big];

        assert!(matches!(total_volume(&trades), Err(FeedError::Overflow(_))));
        assert_eq!(total_volume(&trades[..1]).expect("volume"), Decimal::MAX);
    }

    #[tokio::test]
    async fn test_ticker_change_24h() {
        let harness = Harness::new();
        let pair = TradingPair::new("BTC", "ETH");
        let now = harness.clock.now();
        harness
            .store
            .record_trade(trade("t1", &pair, "9.9", now - Duration::hours(23)));
        harness
            .store
            .record_trade(trade("t2", &pair, "10.1", now - Duration::hours(1)));
        harness
            .store
            .record_trade(trade("old", &pair, "1.0", now - Duration::hours(25)));

        let publisher = TickerPublisher::new(harness.store(), harness.sink(), harness.clock());
        let snapshot = publisher.snapshot(&pair).await.expect("snapshot");

        assert!((snapshot.change_24h - 2.0202).abs() < 0.001);
        assert_eq!(snapshot.last_price, Some(dec("10.1")));
        assert_eq!(snapshot.volume_24h, dec("2.0"));
    }

    #[tokio::test]
    async fn test_ticker_empty_window() {
        let harness = Harness::new();
        let pair = TradingPair::new("BTC", "ETH");

        let publisher = TickerPublisher::new(harness.store(), harness.sink(), harness.clock());
        let snapshot = publisher.snapshot(&pair).await.expect("snapshot");

        assert_eq!(snapshot.change_24h, 0.0);
        assert_eq!(snapshot.last_price, None);
        assert_eq!(snapshot.volume_24h, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_publish_ticker_data() {
        let harness = Harness::new();
        let pair = TradingPair::new("BTC", "ETH");
        harness
            .store
            .upsert_order(order("b1", &pair, Side::Buy, "9.0", "1"));
        harness
            .store
            .upsert_order(order("b2", &pair, Side::Buy, "9.5", "1"));
        harness
            .store
            .upsert_order(order("s1", &pair, Side::Sell, "10.5", "1"));
        let mut rx = harness
            .subscriber(Channel::Ticker, Some(Params::pair("BTC", "ETH")))
            .await;

        let publisher = TickerPublisher::new(harness.store(), harness.sink(), harness.clock());
        publisher
            .publish_ticker_data("BTC", "ETH")
            .await
            .expect("publish");

        let envelope = next_event(&mut rx);
        assert_eq!(envelope.event, Event::TickerUpdate);
        assert_eq!(envelope.payload["bestBid"], "9.5");
        assert_eq!(envelope.payload["bestAsk"], "10.5");
        assert_eq!(envelope.payload["change24h"], 0.0);
        assert!(envelope.payload["lastPrice"].is_null());
    }
}
