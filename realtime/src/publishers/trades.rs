//! Trade event publisher.

use serde::Serialize;
use tracing::{debug, warn};

use super::PublishSink;
use crate::error::Result;
use crate::store::{Side, Trade};
use crate::ws::channels::{Channel, Event};

/// Per-participant notice sent when a trade completes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FillNotice<'a> {
    #[serde(flatten)]
    trade: &'a Trade,
    side: Side,
}

/// Publishes trade events on `TRADES`.
#[derive(Debug, Clone)]
pub struct TradesPublisher {
    sink: PublishSink,
}

impl TradesPublisher {
    /// Creates a new trades publisher.
    #[must_use]
    pub const fn new(sink: PublishSink) -> Self {
        Self { sink }
    }

    /// Announces a newly created trade, scoped by its pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the trade cannot be serialized.
    pub async fn publish_trade_created(&self, trade: &Trade) -> Result<()> {
        self.sink
            .publish(
                Channel::Trades,
                Event::TradeCreated,
                trade,
                Some(trade.pair().params()),
            )
            .await?;

        debug!(trade_id = %trade.id, pair = %trade.pair(), "Published trade created");
        Ok(())
    }

    /// Announces a completed trade and notifies both participants.
    ///
    /// Returns the number of participant deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the trade cannot be serialized.
    pub async fn publish_trade_completed(&self, trade: &Trade) -> Result<usize> {
        self.sink
            .publish(
                Channel::Trades,
                Event::TradeCompleted,
                trade,
                Some(trade.pair().params()),
            )
            .await?;

        let mut notified = 0;
        for (user_id, side) in [
            (trade.buyer_id.as_deref(), Side::Buy),
            (trade.seller_id.as_deref(), Side::Sell),
        ] {
            let Some(user_id) = user_id else {
                continue;
            };
            let notice = FillNotice { trade, side };
            match self
                .sink
                .publish_to_user(user_id, Event::OrderUpdate, &notice)
                .await
            {
                Ok(delivered) => notified += delivered,
                Err(e) => warn!(trade_id = %trade.id, user_id, "Fill notice failed: {}", e),
            }
        }

        debug!(trade_id = %trade.id, notified, "Published trade completed");
        Ok(notified)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::batcher::MessageBatcher;
    use crate::clock::Clock;
    use crate::publishers::testing::{next_event, Harness};
    use crate::store::fixtures::trade;
    use crate::store::TradingPair;
    use crate::ws::channels::Params;

    fn completed_trade(harness: &Harness) -> Trade {
        let mut t = trade(
            "t1",
            &TradingPair::new("BTC", "ETH"),
            "10.0",
            harness.clock.now(),
        );
        t.buyer_id = Some("alice".to_string());
        t.seller_id = Some("bob".to_string());
        t
    }

    #[tokio::test]
    async fn test_publish_trade_created() {
        let harness = Harness::new();
        let mut rx = harness
            .subscriber(Channel::Trades, Some(Params::pair("BTC", "ETH")))
            .await;
        let publisher = TradesPublisher::new(harness.sink());

        publisher
            .publish_trade_created(&completed_trade(&harness))
            .await
            .expect("publish");

        let envelope = next_event(&mut rx);
        assert_eq!(envelope.event, Event::TradeCreated);
        assert_eq!(envelope.payload["id"], "t1");
        assert_eq!(envelope.payload["price"], "10.0");
    }

    #[tokio::test]
    async fn test_publish_trade_completed_notifies_participants() {
        let harness = Harness::new();
        let mut channel_rx = harness
            .subscriber(Channel::Trades, Some(Params::pair("BTC", "ETH")))
            .await;
        let mut alice = harness.user("alice-token").await;
        let mut bob = harness.user("bob-token").await;
        let publisher = TradesPublisher::new(harness.sink());

        let notified = publisher
            .publish_trade_completed(&completed_trade(&harness))
            .await
            .expect("publish");

        assert_eq!(notified, 2);
        assert_eq!(next_event(&mut channel_rx).event, Event::TradeCompleted);

        let alice_notice = next_event(&mut alice);
        assert_eq!(alice_notice.event, Event::OrderUpdate);
        assert_eq!(alice_notice.channel, Channel::Wallet);
        assert_eq!(alice_notice.payload["side"], "buy");
        assert_eq!(alice_notice.payload["id"], "t1");
        assert_eq!(next_event(&mut bob).payload["side"], "sell");
    }

    #[tokio::test]
    async fn test_batched_trades() {
        let harness = Harness::new();
        let mut rx = harness
            .subscriber(Channel::Trades, Some(Params::pair("BTC", "ETH")))
            .await;
        let batcher = Arc::new(MessageBatcher::new(
            Arc::clone(&harness.manager),
            None,
            harness.clock(),
            Duration::from_secs(60),
            50,
        ));
        let publisher = TradesPublisher::new(PublishSink::batched(
            Arc::clone(&harness.manager),
            Arc::clone(&batcher),
        ));

        publisher
            .publish_trade_created(&completed_trade(&harness))
            .await
            .expect("publish");
        assert!(rx.try_recv().is_err());

        batcher.flush_all().await;
        let envelope = next_event(&mut rx);
        assert_eq!(envelope.payload["messages"][0]["id"], "t1");
    }
}
