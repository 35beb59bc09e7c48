//! WebSocket module for real-time market data.
//!
//! Provides the connection registry, topic vocabulary, wire messages and
//! metrics for streaming order book, ticker, trade, wallet and peer events
//! to connected clients.
//!
//! # Channels
//!
//! - `ORDERBOOK` - Order book snapshots, scoped by `{baseAsset, quoteAsset}`
//! - `TICKER` - Ticker statistics, scoped by pair
//! - `TRADES` - Trade created / completed events, scoped by pair
//! - `WALLET` - Balance and order events for the authenticated user
//! - `PEER` - Peer presence
//!
//! # Message Types
//!
//! - `authenticate` - Bind a user id to the connection
//! - `subscribe` / `unsubscribe` - Channel subscription requests
//! - `ping` - Keepalive

pub mod channels;
pub mod connection;
pub mod handler;
pub mod manager;
pub mod messages;
pub mod metrics;

pub use channels::{Channel, Event, Params, Subscription, TopicKey};
pub use connection::{Connection, ConnectionId};
pub use handler::{ws_handler, WsState};
pub use manager::{ConnectionManager, SubscribeStatus};
pub use messages::{ClientMessage, ControlMessage, Envelope, ServerMessage};
pub use metrics::{MetricsCollector, MetricsSnapshot};
