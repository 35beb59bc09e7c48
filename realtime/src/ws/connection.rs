//! WebSocket connection state.
//!
//! Provides per-client identity, authentication and subscription tracking.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::channels::{Channel, Params, Subscription};
use super::messages::ServerMessage;

/// Connection identifier.
pub type ConnectionId = u64;

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique connection ID.
#[must_use]
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Message queued for the client.
    Sent,
    /// Client queue is full; message dropped.
    Full,
    /// Client is gone; message dropped.
    Closed,
}

/// WebSocket connection state.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,

    /// Subscriptions held by this connection.
    pub subscriptions: HashSet<Subscription>,

    /// Sender for outgoing messages.
    pub sender: mpsc::Sender<ServerMessage>,

    /// Authenticated user id (if any).
    pub user_id: Option<String>,
}

impl Connection {
    /// Creates a new connection.
    #[must_use]
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: next_connection_id(),
            subscriptions: HashSet::new(),
            sender,
            user_id: None,
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the key this connection is rate limited under.
    #[must_use]
    pub fn rate_limit_key(&self) -> String {
        rate_limit_key(self.id)
    }

    /// Returns true if the connection is authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Returns true if authenticated as `user_id`.
    #[must_use]
    pub fn is_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// Marks the connection as authenticated.
    pub fn authenticate(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    /// Adds a subscription. Returns false if it was already present.
    pub fn subscribe(&mut self, channel: Channel, params: Option<Params>) -> bool {
        self.subscriptions.insert(Subscription::new(channel, params))
    }

    /// Removes a subscription. Returns false if it was not present.
    pub fn unsubscribe(&mut self, channel: Channel, params: Option<Params>) -> bool {
        self.subscriptions
            .remove(&Subscription::new(channel, params))
    }

    /// Returns true if subscribed to exactly `(channel, params)`.
    #[must_use]
    pub fn is_subscribed(&self, channel: Channel, params: Option<Params>) -> bool {
        self.subscriptions
            .contains(&Subscription::new(channel, params))
    }

    /// Returns true if any subscription is targeted by a publish on
    /// `channel` with `params`.
    #[must_use]
    pub fn wants(&self, channel: Channel, params: Option<&Params>) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.matches(channel, params))
    }

    /// Returns the number of subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Queues a message without waiting for queue space.
    pub fn try_send(&self, message: ServerMessage) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Sends a message to this connection, waiting for queue space.
    ///
    /// Returns true if the message was sent successfully.
    pub async fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }
}

/// Returns the rate limiter key for a connection.
#[must_use]
pub fn rate_limit_key(id: ConnectionId) -> String {
    format!("conn:{id}")
}
