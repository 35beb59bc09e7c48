//! Peer presence publisher.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::PublishSink;
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{DataStore, Peer};
use crate::ws::channels::{Channel, Event};

/// List of online peers.
#[derive(Debug, Clone, Serialize)]
pub struct PeerList {
    /// Online peers, sorted by id.
    pub peers: Vec<Peer>,
    /// Snapshot time in epoch milliseconds.
    pub timestamp: i64,
}

/// Publishes presence events on `PEER`.
#[derive(Debug, Clone)]
pub struct PeerPublisher {
    store: Arc<dyn DataStore>,
    sink: PublishSink,
    clock: Arc<dyn Clock>,
}

impl PeerPublisher {
    /// Creates a new peer publisher.
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>, sink: PublishSink, clock: Arc<dyn Clock>) -> Self {
        Self { store, sink, clock }
    }

    /// Announces a peer coming online.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be serialized.
    pub async fn peer_connected(&self, peer: &Peer) -> Result<()> {
        self.sink
            .publish(Channel::Peer, Event::PeerConnected, peer, None)
            .await?;

        debug!(peer_id = %peer.id, "Published peer connected");
        Ok(())
    }

    /// Announces a peer going offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub async fn peer_disconnected(&self, peer_id: &str) -> Result<()> {
        let payload = json!({
            "id": peer_id,
            "timestamp": self.clock.now_millis(),
        });
        self.sink
            .publish(Channel::Peer, Event::PeerDisconnected, &payload, None)
            .await?;

        debug!(peer_id, "Published peer disconnected");
        Ok(())
    }

    /// Publishes the full list of online peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query or serialization fails.
    pub async fn publish_peer_list(&self) -> Result<PeerList> {
        let list = PeerList {
            peers: self.store.online_peers().await?,
            timestamp: self.clock.now_millis(),
        };

        self.sink
            .publish(Channel::Peer, Event::PeerList, &list, None)
            .await?;

        debug!(peers = list.peers.len(), "Published peer list");
        Ok(list)
    }
}
