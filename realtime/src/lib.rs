//! Marketwire realtime layer.
//!
//! Streams order book, ticker, trade, wallet and peer-presence events to
//! WebSocket clients over a subscription registry with per-connection rate
//! limiting, time/size batching, optional payload compression and
//! operational metrics.
//!
//! # Modules
//!
//! - [`ws`] - Connection registry, topic vocabulary, wire messages, metrics
//! - [`batcher`] - Per-topic message batching
//! - [`compression`] - Gzip, deflate and brotli payload envelopes
//! - [`publishers`] - Domain snapshot publishers
//! - [`store`] - Data store trait with in-memory and Postgres backends
//! - [`server`] - HTTP router and component wiring

pub mod auth;
pub mod batcher;
pub mod clock;
pub mod compression;
pub mod config;
pub mod error;
pub mod publishers;
pub mod rate_limiter;
pub mod server;
pub mod store;
pub mod ws;

pub use auth::{AuthValidator, StaticTokenValidator};
pub use batcher::MessageBatcher;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionAlgorithm, MessageCompressor};
pub use config::{ConfigError, FeedConfig};
pub use error::{FeedError, Result};
pub use publishers::{PublishSink, Publishers};
pub use rate_limiter::RateLimiter;
pub use server::{create_router, Server};
pub use store::{DataStore, MemoryStore, PgStore};
pub use ws::{ConnectionManager, MetricsCollector};
