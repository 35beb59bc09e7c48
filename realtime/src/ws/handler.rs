//! WebSocket connection handler.
//!
//! Provides the WebSocket upgrade handler and the per-connection loop that
//! dispatches inbound control messages to the connection manager.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::channels::{Channel, Params, Subscription};
use super::connection::{Connection, ConnectionId};
use super::manager::{ConnectionManager, SubscribeStatus};
use super::messages::{ClientMessage, ServerMessage};
use super::metrics::MetricsCollector;
use crate::error::{ErrorKind, MessageError};

/// Default outbound queue depth per connection.
pub const DEFAULT_CLIENT_BUFFER: usize = 100;

/// WebSocket state shared across connections.
#[derive(Debug, Clone)]
pub struct WsState {
    /// Connection manager.
    pub manager: Arc<ConnectionManager>,
    /// Metrics.
    pub metrics: Arc<MetricsCollector>,
    /// Outbound queue depth per connection.
    pub client_buffer_size: usize,
}

impl WsState {
    /// Creates a new WebSocket state.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            metrics: manager.metrics(),
            manager,
            client_buffer_size: DEFAULT_CLIENT_BUFFER,
        }
    }

    /// Sets the outbound queue depth per connection.
    #[must_use]
    pub fn with_client_buffer(mut self, size: usize) -> Self {
        self.client_buffer_size = size.max(1);
        self
    }
}

/// WebSocket upgrade handler.
///
/// Upgrades an HTTP connection to a WebSocket connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Handles a WebSocket connection.
async fn handle_connection(socket: WebSocket, state: WsState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.client_buffer_size);
    let replies = tx.clone();

    let connection_id = state.manager.register(Connection::new(tx)).await;

    // Spawn task to forward messages from channel to WebSocket
    let metrics = Arc::clone(&state.metrics);
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    metrics.record_error(ErrorKind::Message);
                    continue;
                }
            };

            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                metrics.record_error(ErrorKind::Connection);
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection_id, "WebSocket error: {}", e);
                state.metrics.record_error(ErrorKind::Connection);
                break;
            }
        };

        let started = Instant::now();

        match msg {
            Message::Text(text) => {
                state.metrics.record_message_received();
                if let Err(e) =
                    handle_text_message(text.as_str(), connection_id, &replies, &state).await
                {
                    state.metrics.record_error(ErrorKind::Message);
                    warn!(connection_id, "Dropping inbound message: {}", e);
                }
            }
            Message::Binary(_) => {
                state.metrics.record_message_received();
                state.metrics.record_error(ErrorKind::Message);
                warn!(connection_id, "Dropping binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {
                debug!(connection_id, "Keepalive frame");
                continue;
            }
            Message::Close(_) => {
                info!(connection_id, "WebSocket close requested");
                break;
            }
        }

        state
            .metrics
            .record_latency(started.elapsed().as_secs_f64() * 1000.0);
    }

    // Cleanup
    state.manager.unregister(connection_id).await;
    sender_task.abort();

    info!(connection_id, "WebSocket connection closed");
}

/// Handles a text message from the client.
///
/// Control failures (rate limiting, bad credentials, unknown channels) are
/// reported to the client and return `Ok`. Only frames that cannot be parsed
/// return an error; those are never echoed back.
async fn handle_text_message(
    text: &str,
    connection_id: ConnectionId,
    replies: &mpsc::Sender<ServerMessage>,
    state: &WsState,
) -> Result<(), MessageError> {
    let msg = ClientMessage::parse(text).map_err(|e| MessageError::Malformed(e.to_string()))?;

    let reply = match msg {
        ClientMessage::Authenticate { token } => {
            handle_authenticate(&token, connection_id, state).await
        }
        ClientMessage::Subscribe { channel, params } => {
            handle_subscribe(&channel, params, connection_id, state).await
        }
        ClientMessage::Unsubscribe { channel, params } => {
            handle_unsubscribe(&channel, params, connection_id, state).await
        }
        // Keepalive, not counted against the rate limit
        ClientMessage::Ping => ServerMessage::pong(),
    };

    if replies.send(reply).await.is_err() {
        debug!(connection_id, "Reply dropped, client queue closed");
    }
    Ok(())
}

/// Handles an authenticate request.
async fn handle_authenticate(
    token: &str,
    connection_id: ConnectionId,
    state: &WsState,
) -> ServerMessage {
    if let Err(e) = state.manager.check_rate_limit(connection_id) {
        return ServerMessage::error("RATE_LIMITED", e.to_string());
    }

    match state.manager.authenticate(connection_id, token).await {
        Ok(user_id) => ServerMessage::authenticated(user_id),
        Err(e) => ServerMessage::authentication_failed(e.to_string()),
    }
}

/// Handles a subscribe request.
async fn handle_subscribe(
    channel_name: &str,
    params: Option<Params>,
    connection_id: ConnectionId,
    state: &WsState,
) -> ServerMessage {
    let channel = match Channel::parse(channel_name) {
        Ok(channel) => channel,
        Err(e) => {
            state.metrics.record_subscription_denied();
            return ServerMessage::subscription_denied(channel_name, e.to_string());
        }
    };

    let params = Subscription::new(channel, params).params;
    match state
        .manager
        .subscribe(connection_id, channel, params.clone())
        .await
    {
        Ok(SubscribeStatus::Subscribed | SubscribeStatus::AlreadySubscribed) => {
            ServerMessage::subscribed(channel, params)
        }
        Err(e) => ServerMessage::subscription_denied(channel_name, e.to_string()),
    }
}

/// Handles an unsubscribe request.
async fn handle_unsubscribe(
    channel_name: &str,
    params: Option<Params>,
    connection_id: ConnectionId,
    state: &WsState,
) -> ServerMessage {
    let channel = match Channel::parse(channel_name) {
        Ok(channel) => channel,
        Err(e) => return ServerMessage::error("INVALID_CHANNEL", e.to_string()),
    };

    if let Err(e) = state.manager.check_rate_limit(connection_id) {
        return ServerMessage::error("RATE_LIMITED", e.to_string());
    }

    let params = Subscription::new(channel, params).params;
    if !state
        .manager
        .unsubscribe(connection_id, channel, params.clone())
        .await
    {
        debug!(connection_id, %channel, "Unsubscribe for absent subscription");
    }
    ServerMessage::unsubscribed(channel, params)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::StaticTokenValidator;
    use crate::clock::{Clock, ManualClock};
    use crate::rate_limiter::RateLimiter;
    use crate::ws::messages::ControlMessage;

    fn ws_state(max_requests: u32) -> WsState {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let metrics = Arc::new(MetricsCollector::new(100, Arc::clone(&clock)));
        let limiter = Arc::new(RateLimiter::new(
            max_requests,
            Duration::from_secs(60),
            Arc::clone(&clock),
        ));
        let auth = Arc::new(StaticTokenValidator::new().with_token("good", "alice"));
        let manager = Arc::new(ConnectionManager::new(limiter, auth, metrics, clock));
        WsState::new(manager)
    }

    async fn connect(
        state: &WsState,
    ) -> (
        ConnectionId,
        mpsc::Sender<ServerMessage>,
        mpsc::Receiver<ServerMessage>,
    ) {
        let (tx, rx) = mpsc::channel(10);
        let id = state.manager.register(Connection::new(tx.clone())).await;
        (id, tx, rx)
    }

    async fn control(rx: &mut mpsc::Receiver<ServerMessage>) -> ControlMessage {
        match rx.recv().await {
            Some(ServerMessage::Control(c)) => c,
            other => panic!("Expected control reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ws_state_new() {
        let state = ws_state(10).with_client_buffer(0);
        assert_eq!(state.client_buffer_size, 1);
        assert_eq!(state.metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_handle_malformed_message() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        let result = handle_text_message("{not json", id, &tx, &state).await;

        assert!(matches!(result, Err(MessageError::Malformed(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_authenticate() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        tokio_test::assert_ok!(
            handle_text_message(r#"{"type":"authenticate","token":"good"}"#, id, &tx, &state)
                .await
        );

        assert_eq!(
            control(&mut rx).await,
            ControlMessage::Authenticated {
                user_id: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_handle_authenticate_failure() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        tokio_test::assert_ok!(
            handle_text_message(r#"{"type":"authenticate","token":"bad"}"#, id, &tx, &state)
                .await
        );

        assert!(matches!(
            control(&mut rx).await,
            ControlMessage::AuthenticationFailed { .. }
        ));
        assert_eq!(state.metrics.get_metrics().errors.authentication, 1);
    }

    #[tokio::test]
    async fn test_handle_subscribe_invalid_channel() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        tokio_test::assert_ok!(
            handle_text_message(r#"{"type":"subscribe","channel":"candles"}"#, id, &tx, &state)
                .await
        );

        match control(&mut rx).await {
            ControlMessage::SubscriptionDenied { channel, reason } => {
                assert_eq!(channel, "candles");
                assert!(reason.contains("invalid channel"));
            }
            other => panic!("Expected SubscriptionDenied, got {other:?}"),
        }
        assert_eq!(state.metrics.get_metrics().errors.subscription, 1);
    }

    #[tokio::test]
    async fn test_handle_subscribe_success() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        let json = r#"{"type":"subscribe","channel":"ORDERBOOK","params":{"baseAsset":"BTC","quoteAsset":"ETH"}}"#;
        tokio_test::assert_ok!(handle_text_message(json, id, &tx, &state).await);

        assert_eq!(
            control(&mut rx).await,
            ControlMessage::Subscribed {
                channel: Channel::Orderbook,
                params: Some(Params::pair("BTC", "ETH")),
            }
        );
        assert_eq!(state.metrics.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_handle_subscribe_empty_params_acknowledged_unscoped() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        let json = r#"{"type":"subscribe","channel":"TICKER","params":{}}"#;
        tokio_test::assert_ok!(handle_text_message(json, id, &tx, &state).await);

        assert_eq!(
            control(&mut rx).await,
            ControlMessage::Subscribed {
                channel: Channel::Ticker,
                params: None,
            }
        );
        assert_eq!(state.manager.subscriber_count(Channel::Ticker, None).await, 1);
    }

    #[tokio::test]
    async fn test_handle_subscribe_rate_limited() {
        let state = ws_state(1);
        let (id, tx, mut rx) = connect(&state).await;

        let json = r#"{"type":"subscribe","channel":"TICKER"}"#;
        tokio_test::assert_ok!(handle_text_message(json, id, &tx, &state).await);
        let json = r#"{"type":"subscribe","channel":"TRADES"}"#;
        tokio_test::assert_ok!(handle_text_message(json, id, &tx, &state).await);

        assert!(matches!(
            control(&mut rx).await,
            ControlMessage::Subscribed { .. }
        ));
        assert!(matches!(
            control(&mut rx).await,
            ControlMessage::SubscriptionDenied { .. }
        ));
        assert_eq!(state.metrics.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_handle_unsubscribe() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        tokio_test::assert_ok!(
            handle_text_message(r#"{"type":"subscribe","channel":"PEER"}"#, id, &tx, &state)
                .await
        );
        tokio_test::assert_ok!(
            handle_text_message(r#"{"type":"unsubscribe","channel":"PEER"}"#, id, &tx, &state)
                .await
        );

        control(&mut rx).await;
        assert_eq!(
            control(&mut rx).await,
            ControlMessage::Unsubscribed {
                channel: Channel::Peer,
                params: None,
            }
        );
        assert_eq!(state.metrics.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_handle_ping() {
        let state = ws_state(10);
        let (id, tx, mut rx) = connect(&state).await;

        tokio_test::assert_ok!(handle_text_message(r#"{"type":"ping"}"#, id, &tx, &state).await);

        assert_eq!(control(&mut rx).await, ControlMessage::Pong);
    }

    #[tokio::test]
    async fn test_ping_not_rate_limited() {
        let state = ws_state(1);
        let (id, tx, mut rx) = connect(&state).await;

        let json = r#"{"type":"subscribe","channel":"TICKER"}"#;
        tokio_test::assert_ok!(handle_text_message(json, id, &tx, &state).await);
        control(&mut rx).await;

        for _ in 0..3 {
            tokio_test::assert_ok!(
                handle_text_message(r#"{"type":"ping"}"#, id, &tx, &state).await
            );
            assert_eq!(control(&mut rx).await, ControlMessage::Pong);
        }

        let json = r#"{"type":"authenticate","token":"good"}"#;
        tokio_test::assert_ok!(handle_text_message(json, id, &tx, &state).await);
        match control(&mut rx).await {
            ControlMessage::Error { code, .. } => assert_eq!(code, "RATE_LIMITED"),
            other => panic!("Expected Error, got {other:?}"),
        }
    }
}
