//! Domain publishers.
//!
//! Each publisher reads from the data store, timestamps a snapshot and pushes
//! it through a [`PublishSink`], either straight to the connection manager or
//! into the batcher.

pub mod market;
pub mod orderbook;
pub mod peer;
pub mod ticker;
pub mod trades;
pub mod wallet;

use std::sync::Arc;

use serde::Serialize;

use crate::batcher::MessageBatcher;
use crate::clock::Clock;
use crate::error::MessageError;
use crate::store::DataStore;
use crate::ws::channels::{Channel, Event, Params};
use crate::ws::manager::ConnectionManager;

pub use market::{MarketPublisher, PublishReport};
pub use orderbook::{OrderbookPublisher, OrderbookSnapshot, PriceLevel};
pub use peer::PeerPublisher;
pub use ticker::{TickerPublisher, TickerSnapshot};
pub use trades::TradesPublisher;
pub use wallet::WalletPublisher;

/// Destination for published snapshots.
#[derive(Debug, Clone)]
pub enum PublishSink {
    /// Publish immediately through the manager.
    Direct(Arc<ConnectionManager>),

    /// Queue topic events in the batcher. User-targeted events still go
    /// through the manager.
    Batched {
        /// Manager used for user-targeted events.
        manager: Arc<ConnectionManager>,
        /// Batcher used for topic events.
        batcher: Arc<MessageBatcher>,
    },
}

impl PublishSink {
    /// Creates a direct sink.
    #[must_use]
    pub fn direct(manager: Arc<ConnectionManager>) -> Self {
        Self::Direct(manager)
    }

    /// Creates a batched sink.
    #[must_use]
    pub fn batched(manager: Arc<ConnectionManager>, batcher: Arc<MessageBatcher>) -> Self {
        Self::Batched { manager, batcher }
    }

    /// Returns the connection manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        match self {
            Self::Direct(manager) | Self::Batched { manager, .. } => manager,
        }
    }

    /// Publishes a topic event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: Channel,
        event: Event,
        payload: &T,
        params: Option<Params>,
    ) -> Result<(), MessageError> {
        match self {
            Self::Direct(manager) => {
                manager
                    .publish(channel, event, payload, params.as_ref())
                    .await?;
            }
            Self::Batched { batcher, .. } => {
                batcher.add_message(channel, event, payload, params).await?;
            }
        }
        Ok(())
    }

    /// Sends an event to every connection of one user. Returns the number
    /// of deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub async fn publish_to_user<T: Serialize + ?Sized>(
        &self,
        user_id: &str,
        event: Event,
        payload: &T,
    ) -> Result<usize, MessageError> {
        self.manager().publish_to_user(user_id, event, payload).await
    }
}

/// The full set of domain publishers.
#[derive(Debug, Clone)]
pub struct Publishers {
    /// Order book snapshots.
    pub orderbook: OrderbookPublisher,
    /// Ticker statistics.
    pub ticker: TickerPublisher,
    /// Trade events.
    pub trades: TradesPublisher,
    /// Balance and order events.
    pub wallet: WalletPublisher,
    /// Peer presence.
    pub peer: PeerPublisher,
    /// Periodic orderbook and ticker refresh.
    pub market: Arc<MarketPublisher>,
}

impl Publishers {
    /// Creates every publisher.
    ///
    /// Trade events go through the batcher when one is given; snapshots and
    /// user-targeted events are published directly.
    #[must_use]
    pub fn new(
        store: Arc<dyn DataStore>,
        manager: Arc<ConnectionManager>,
        batcher: Option<Arc<MessageBatcher>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let direct = PublishSink::direct(Arc::clone(&manager));
        let trade_sink = match batcher {
            Some(batcher) => PublishSink::batched(manager, batcher),
            None => direct.clone(),
        };

        let orderbook =
            OrderbookPublisher::new(Arc::clone(&store), direct.clone(), Arc::clone(&clock));
        let ticker = TickerPublisher::new(Arc::clone(&store), direct.clone(), Arc::clone(&clock));
        let market = Arc::new(MarketPublisher::new(
            Arc::clone(&store),
            orderbook.clone(),
            ticker.clone(),
        ));

        Self {
            trades: TradesPublisher::new(trade_sink),
            wallet: WalletPublisher::new(Arc::clone(&store), direct.clone(), Arc::clone(&clock)),
            peer: PeerPublisher::new(store, direct, clock),
            orderbook,
            ticker,
            market,
        }
    }
}
