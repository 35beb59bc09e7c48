//! Per-account wallet publisher.
//!
//! Wallet events go to the user's authenticated connections, not to channel
//! subscribers.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::PublishSink;
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{Balance, DataStore, Order};
use crate::ws::channels::Event;

/// Balance snapshot for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    /// Owner user id.
    pub user_id: String,
    /// Balances per asset.
    pub balances: Vec<Balance>,
    /// Snapshot time in epoch milliseconds.
    pub timestamp: i64,
}

/// Publishes `BALANCE_UPDATE` and `ORDER_UPDATE` events.
#[derive(Debug, Clone)]
pub struct WalletPublisher {
    store: Arc<dyn DataStore>,
    sink: PublishSink,
    clock: Arc<dyn Clock>,
}

impl WalletPublisher {
    /// Creates a new wallet publisher.
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, sink: PublishSink, clock: Arc<dyn Clock>) -> Self {
        Self { store, sink, clock }
    }

    /// Sends the user's current balances to their connections.
    ///
    /// Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query or serialization fails.
    pub async fn publish_balance_update(&self, user_id: &str) -> Result<usize> {
        let snapshot = BalanceSnapshot {
            user_id: user_id.to_string(),
            balances: self.store.balances(user_id).await?,
            timestamp: self.clock.now_millis(),
        };

        let delivered = self
            .sink
            .publish_to_user(user_id, Event::BalanceUpdate, &snapshot)
            .await?;

        debug!(user_id, assets = snapshot.balances.len(), delivered, "Published balance update");
        Ok(delivered)
    }

    /// Sends an order confirmation to the user's connections.
    ///
    /// Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the order cannot be serialized.
    pub async fn publish_order_confirmation(&self, user_id: &str, order: &Order) -> Result<usize> {
        let delivered = self
            .sink
            .publish_to_user(user_id, Event::OrderUpdate, order)
            .await?;

        debug!(user_id, order_id = %order.id, delivered, "Published order confirmation");
        Ok(delivered)
    }
}
