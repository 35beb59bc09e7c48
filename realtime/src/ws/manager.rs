//! Connection and subscription registry.
//!
//! The manager owns every live connection, gates control messages through
//! the rate limiter, and resolves publish targets. All bookkeeping happens
//! under a single lock on the connection map; delivery never waits on a slow
//! client.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::channels::{Channel, Event, Params, TopicKey};
use super::connection::{rate_limit_key, Connection, ConnectionId, Delivery};
use super::messages::ServerMessage;
use super::metrics::MetricsCollector;
use crate::auth::AuthValidator;
use crate::clock::Clock;
use crate::error::{AuthError, MessageError, SubscriptionError};
use crate::rate_limiter::RateLimiter;

/// Result of an admitted subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    /// A new subscription was added.
    Subscribed,
    /// The connection already held this subscription.
    AlreadySubscribed,
}

/// Registry of live connections and their subscriptions.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    rate_limiter: Arc<RateLimiter>,
    auth: Arc<dyn AuthValidator>,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
}

impl ConnectionManager {
    /// Creates a new connection manager.
    #[must_use]
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        auth: Arc<dyn AuthValidator>,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rate_limiter,
            auth,
            metrics,
            clock,
        }
    }

    /// Returns the metrics collector.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Registers a connection.
    pub async fn register(&self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        self.connections.write().await.insert(id, connection);
        self.metrics.record_connection();
        info!(connection_id = id, "Client registered");
        id
    }

    /// Removes a connection and releases its subscriptions.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.write().await.remove(&id)?;
        self.metrics
            .record_disconnection(connection.subscription_count());
        self.rate_limiter.reset(&rate_limit_key(id));
        info!(
            connection_id = id,
            subscriptions = connection.subscription_count(),
            "Client unregistered"
        );
        Some(connection)
    }

    /// Authenticates a connection with a bearer token.
    ///
    /// The connection is left untouched on failure.
    ///
    /// # Errors
    ///
    /// Returns the validator's error, or `UnknownConnection` if the
    /// connection is not registered.
    pub async fn authenticate(&self, id: ConnectionId, token: &str) -> Result<String, AuthError> {
        let result = self.validate_for(id, token).await;

        match &result {
            Ok(user_id) => {
                self.metrics.record_auth_success();
                info!(connection_id = id, user_id = %user_id, "Client authenticated");
            }
            Err(e) => {
                self.metrics.record_auth_failure();
                warn!(connection_id = id, "Authentication failed: {}", e);
            }
        }

        result
    }

    async fn validate_for(&self, id: ConnectionId, token: &str) -> Result<String, AuthError> {
        if !self.connections.read().await.contains_key(&id) {
            return Err(AuthError::UnknownConnection(id));
        }

        let user_id = self.auth.validate(token).await?;

        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&id)
            .ok_or(AuthError::UnknownConnection(id))?;
        connection.authenticate(user_id.clone());
        Ok(user_id)
    }

    /// Counts a control message against the connection's rate limit.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` if the connection has exhausted its window.
    pub fn check_rate_limit(&self, id: ConnectionId) -> Result<(), SubscriptionError> {
        let key = rate_limit_key(id);
        if self.rate_limiter.is_allowed(&key) {
            return Ok(());
        }

        Err(SubscriptionError::RateLimited {
            remaining: self.rate_limiter.get_remaining(&key),
            reset_at: self.rate_limiter.get_reset_time(&key),
        })
    }

    /// Subscribes a connection to `(channel, params)`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` if the rate limiter denies the request, or
    /// `UnknownConnection` if the connection is not registered.
    pub async fn subscribe(
        &self,
        id: ConnectionId,
        channel: Channel,
        params: Option<Params>,
    ) -> Result<SubscribeStatus, SubscriptionError> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&id)
            .ok_or(SubscriptionError::UnknownConnection(id))?;

        if let Err(denied) = self.check_rate_limit(id) {
            self.metrics.record_subscription_denied();
            warn!(connection_id = id, %channel, "Subscription denied: {}", denied);
            return Err(denied);
        }

        if !connection.subscribe(channel, params.clone()) {
            debug!(connection_id = id, %channel, "Already subscribed");
            return Ok(SubscribeStatus::AlreadySubscribed);
        }

        self.metrics.record_subscription();
        let scope = params.as_ref().map(Params::canonical).unwrap_or_default();
        debug!(connection_id = id, %channel, %scope, "Subscribed");
        Ok(SubscribeStatus::Subscribed)
    }

    /// Removes `(channel, params)` from a connection. Returns true if the
    /// subscription existed.
    pub async fn unsubscribe(
        &self,
        id: ConnectionId,
        channel: Channel,
        params: Option<Params>,
    ) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections
            .get_mut(&id)
            .is_some_and(|c| c.unsubscribe(channel, params));

        if removed {
            self.metrics.record_unsubscription();
            debug!(connection_id = id, %channel, "Unsubscribed");
        }
        removed
    }

    /// Publishes an event to every matching subscriber.
    ///
    /// With `params`, only connections subscribed to exactly
    /// `(channel, params)` receive the event; without, every connection
    /// subscribed to `channel` does. Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: Channel,
        event: Event,
        payload: &T,
        params: Option<&Params>,
    ) -> Result<usize, MessageError> {
        let payload = serde_json::to_value(payload)?;
        let params = params.filter(|p| !p.is_empty());
        let message = ServerMessage::event(
            channel,
            event,
            payload,
            params.cloned(),
            self.clock.now_millis(),
        );

        let connections = self.connections.read().await;
        let delivered = self.deliver(
            connections.values().filter(|c| c.wants(channel, params)),
            &message,
        );

        if delivered > 0 {
            debug!(
                topic = %TopicKey::new(channel, event, params),
                delivered,
                "Published"
            );
        }
        Ok(delivered)
    }

    /// Sends an event to every connection authenticated as `user_id`,
    /// regardless of subscriptions. Returns the number of deliveries.
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
        let payload = serde_json::to_value(payload)?;
        let message = ServerMessage::event(
            event.channel(),
            event,
            payload,
            None,
            self.clock.now_millis(),
        );

        let connections = self.connections.read().await;
        let delivered = self.deliver(
            connections.values().filter(|c| c.is_user(user_id)),
            &message,
        );

        debug!(user_id, %event, delivered, "Published to user");
        Ok(delivered)
    }

    fn deliver<'a>(
        &self,
        targets: impl Iterator<Item = &'a Connection>,
        message: &ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        for connection in targets {
            match connection.try_send(message.clone()) {
                Delivery::Sent => delivered += 1,
                Delivery::Full => {
                    self.metrics.record_message_dropped();
                    warn!(connection_id = connection.id(), "Client queue full, dropping message");
                }
                Delivery::Closed => {
                    self.metrics.record_message_dropped();
                    debug!(connection_id = connection.id(), "Client queue closed");
                }
            }
        }
        self.metrics.record_messages_sent(delivered as u64);
        delivered
    }

    /// Returns the number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns the number of connections a publish on `(channel, params)`
    /// would reach.
    pub async fn subscriber_count(&self, channel: Channel, params: Option<&Params>) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.wants(channel, params))
            .count()
    }

    /// Returns the total number of subscriptions across all connections.
    pub async fn total_subscriptions(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(Connection::subscription_count)
            .sum()
    }

    /// Returns the authenticated user id of a connection.
    pub async fn user_id(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|c| c.user_id.clone())
    }
}
