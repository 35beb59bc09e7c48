//! Time- and size-based message batching.
//!
//! Messages for the same topic key are grouped and published as one
//! `{messages, timestamp}` payload, either on the flush interval or as soon
//! as the batch reaches its size limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::compression::{CompressionAlgorithm, MessageCompressor};
use crate::config::FeedConfig;
use crate::error::MessageError;
use crate::ws::channels::{Channel, Event, Params, TopicKey};
use crate::ws::manager::ConnectionManager;

/// Messages waiting to be published under one topic key.
#[derive(Debug)]
struct Batch {
    channel: Channel,
    event: Event,
    params: Option<Params>,
    messages: Vec<Value>,
    created_at: DateTime<Utc>,
}

/// Groups messages by topic key and publishes them through the manager.
#[derive(Debug)]
pub struct MessageBatcher {
    /// Pending batches. Held across a flush so one key publishes in order.
    batches: Mutex<HashMap<TopicKey, Batch>>,

    /// Connection manager used for fan-out.
    manager: Arc<ConnectionManager>,

    /// Optional compressor applied to flushed payloads.
    compressor: Option<Arc<MessageCompressor>>,

    /// Time source.
    clock: Arc<dyn Clock>,

    /// Flush interval.
    interval: Duration,

    /// Batch size that triggers an immediate flush.
    max_batch_size: usize,

    /// Flush timer task.
    timer: SyncMutex<Option<JoinHandle<()>>>,

    /// Whether the flush timer is active.
    running: AtomicBool,
}

impl MessageBatcher {
    /// Creates a new batcher. The timer is not started.
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager>,
        compressor: Option<Arc<MessageCompressor>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        max_batch_size: usize,
    ) -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            manager,
            compressor,
            clock,
            interval,
            max_batch_size: max_batch_size.max(1),
            timer: SyncMutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Creates a batcher from configuration.
    ///
    /// A compressor is attached unless the configured algorithm is `none`.
    #[must_use]
    pub fn from_config(
        config: &FeedConfig,
        manager: Arc<ConnectionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let compressor = (config.compression != CompressionAlgorithm::None).then(|| {
            Arc::new(MessageCompressor::new(
                config.compression,
                config.compression_threshold,
                config.compression_level,
            ))
        });

        Self::new(
            manager,
            compressor,
            clock,
            config.batch_interval(),
            config.max_batch_size,
        )
    }

    /// Starts the flush timer. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let batcher: Weak<Self> = Arc::downgrade(self);
        let period = self.interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(batcher) = batcher.upgrade() else {
                    break;
                };
                batcher.flush_all().await;
            }
        });

        *self.timer.lock() = Some(handle);
        info!(interval_ms = period.as_millis() as u64, "Message batcher started");
    }

    /// Cancels the flush timer, then flushes everything still pending.
    ///
    /// Returns the number of batches flushed.
    pub async fn stop(&self) -> usize {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }

        let flushed = self.flush_all().await;
        info!(flushed, "Message batcher stopped");
        flushed
    }

    /// Returns true if the flush timer is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the number of topic keys with pending messages.
    pub async fn pending_batches(&self) -> usize {
        self.batches.lock().await.len()
    }

    /// Queues a message for its topic key.
    ///
    /// Flushes the batch immediately once it reaches the size limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized or the
    /// size-triggered flush fails.
    pub async fn add_message<T: Serialize + ?Sized>(
        &self,
        channel: Channel,
        event: Event,
        message: &T,
        params: Option<Params>,
    ) -> Result<(), MessageError> {
        let message = serde_json::to_value(message)?;
        let params = params.filter(|p| !p.is_empty());
        let key = TopicKey::new(channel, event, params.as_ref());

        let mut batches = self.batches.lock().await;
        let batch = batches.entry(key.clone()).or_insert_with(|| Batch {
            channel,
            event,
            params,
            messages: Vec::new(),
            created_at: self.clock.now(),
        });
        batch.messages.push(message);

        if batch.messages.len() < self.max_batch_size {
            return Ok(());
        }

        if let Some(batch) = batches.remove(&key) {
            self.flush_batch(&key, batch).await?;
        }
        Ok(())
    }

    /// Flushes every pending batch.
    ///
    /// A failing key is logged and does not stop the others. Returns the
    /// number of batches published.
    pub async fn flush_all(&self) -> usize {
        let mut batches = self.batches.lock().await;
        let mut flushed = 0;

        for (key, batch) in batches.drain() {
            match self.flush_batch(&key, batch).await {
                Ok(_) => flushed += 1,
                Err(e) => error!(topic = %key, "Failed to flush batch: {}", e),
            }
        }

        flushed
    }

    async fn flush_batch(&self, key: &TopicKey, batch: Batch) -> Result<usize, MessageError> {
        let size = batch.messages.len();
        let age_ms = (self.clock.now() - batch.created_at).num_milliseconds();

        let mut payload = json!({
            "messages": batch.messages,
            "timestamp": self.clock.now_millis(),
        });
        if let Some(compressor) = &self.compressor {
            payload = compressor.compress(&payload);
        }

        let delivered = self
            .manager
            .publish(batch.channel, batch.event, &payload, batch.params.as_ref())
            .await?;

        debug!(topic = %key, size, age_ms, delivered, "Flushed batch");
        Ok(delivered)
    }
}

impl Drop for MessageBatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::auth::StaticTokenValidator;
    use crate::clock::ManualClock;
    use crate::rate_limiter::RateLimiter;
    use crate::ws::connection::Connection;
    use crate::ws::messages::ServerMessage;
    use crate::ws::metrics::MetricsCollector;

    struct Fixture {
        manager: Arc<ConnectionManager>,
        clock: Arc<dyn Clock>,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let metrics = Arc::new(MetricsCollector::new(100, Arc::clone(&clock)));
        let limiter = Arc::new(RateLimiter::new(
            100,
            Duration::from_secs(60),
            Arc::clone(&clock),
        ));
        let auth = Arc::new(StaticTokenValidator::new());
        let manager = Arc::new(ConnectionManager::new(
            limiter,
            auth,
            metrics,
            Arc::clone(&clock),
        ));
        Fixture { manager, clock }
    }

    impl Fixture {
        fn batcher(&self, interval: Duration, max: usize) -> Arc<MessageBatcher> {
            Arc::new(MessageBatcher::new(
                Arc::clone(&self.manager),
                None,
                Arc::clone(&self.clock),
                interval,
                max,
            ))
        }

        async fn subscriber(
            &self,
            channel: Channel,
            params: Option<Params>,
        ) -> mpsc::Receiver<ServerMessage> {
            let (tx, rx) = mpsc::channel(16);
            let id = self.manager.register(Connection::new(tx)).await;
            self.manager
                .subscribe(id, channel, params)
                .await
                .expect("subscribe");
            rx
        }
    }

    fn batch_payload(message: ServerMessage) -> Value {
        message.as_event().expect("event").payload.clone()
    }

    #[tokio::test]
    async fn test_messages_below_limit_form_one_batch() {
        let fx = fixture();
        let mut rx = fx
            .subscriber(Channel::Trades, Some(Params::pair("BTC", "ETH")))
            .await;
        let batcher = fx.batcher(Duration::from_secs(60), 50);

        for i in 0..3 {
            batcher
                .add_message(
                    Channel::Trades,
                    Event::TradeCreated,
                    &json!({"id": i}),
                    Some(Params::pair("BTC", "ETH")),
                )
                .await
                .expect("add");
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.pending_batches().await, 1);

        assert_eq!(batcher.flush_all().await, 1);

        let payload = batch_payload(rx.try_recv().expect("batch"));
        assert_eq!(
            payload["messages"],
            json!([{"id": 0}, {"id": 1}, {"id": 2}])
        );
        assert!(payload["timestamp"].is_i64());
        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.pending_batches().await, 0);
    }

    #[tokio::test]
    async fn test_full_batch_flushes_immediately() {
        let fx = fixture();
        let mut rx = fx.subscriber(Channel::Ticker, None).await;
        let batcher = fx.batcher(Duration::from_secs(60), 3);

        for i in 0..3 {
            batcher
                .add_message(Channel::Ticker, Event::TickerUpdate, &json!(i), None)
                .await
                .expect("add");
        }

        let payload = batch_payload(rx.try_recv().expect("batch"));
        assert_eq!(payload["messages"], json!([0, 1, 2]));
        assert_eq!(batcher.pending_batches().await, 0);
    }

    #[tokio::test]
    async fn test_overflow_message_starts_fresh_batch() {
        let fx = fixture();
        let mut rx = fx.subscriber(Channel::Ticker, None).await;
        let batcher = fx.batcher(Duration::from_secs(60), 3);

        for i in 0..4 {
            batcher
                .add_message(Channel::Ticker, Event::TickerUpdate, &json!(i), None)
                .await
                .expect("add");
        }

        let first = batch_payload(rx.try_recv().expect("full batch"));
        assert_eq!(first["messages"], json!([0, 1, 2]));
        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.pending_batches().await, 1);

        assert_eq!(batcher.flush_all().await, 1);
        let second = batch_payload(rx.try_recv().expect("remainder"));
        assert_eq!(second["messages"], json!([3]));
    }

    #[tokio::test]
    async fn test_closed_subscriber_does_not_block_other_keys() {
        let fx = fixture();
        let closed = fx
            .subscriber(Channel::Trades, Some(Params::pair("BTC", "ETH")))
            .await;
        drop(closed);
        let mut rx = fx
            .subscriber(Channel::Trades, Some(Params::pair("BTC", "USD")))
            .await;
        let batcher = fx.batcher(Duration::from_secs(60), 50);

        for quote in ["ETH", "USD"] {
            batcher
                .add_message(
                    Channel::Trades,
                    Event::TradeCreated,
                    &json!({"quote": quote}),
                    Some(Params::pair("BTC", quote)),
                )
                .await
                .expect("add");
        }

        assert_eq!(batcher.flush_all().await, 2);
        let payload = batch_payload(rx.try_recv().expect("batch"));
        assert_eq!(payload["messages"], json!([{"quote": "USD"}]));
        assert_eq!(fx.manager.metrics().get_metrics().messages.dropped, 1);
        assert_eq!(batcher.pending_batches().await, 0);
    }

    #[tokio::test]
    async fn test_keys_batch_separately() {
        let fx = fixture();
        let batcher = fx.batcher(Duration::from_secs(60), 50);

        batcher
            .add_message(
                Channel::Orderbook,
                Event::OrderbookUpdate,
                &json!({}),
                Some(Params::pair("BTC", "ETH")),
            )
            .await
            .expect("add");
        batcher
            .add_message(
                Channel::Orderbook,
                Event::OrderbookUpdate,
                &json!({}),
                Some(Params::pair("BTC", "USD")),
            )
            .await
            .expect("add");
        batcher
            .add_message(
                Channel::Orderbook,
                Event::OrderbookUpdate,
                &json!({}),
                Some(Params::new()),
            )
            .await
            .expect("add");

        assert_eq!(batcher.pending_batches().await, 3);
        assert_eq!(batcher.flush_all().await, 3);
    }

    #[tokio::test]
    async fn test_timer_flushes_pending() {
        let fx = fixture();
        let mut rx = fx.subscriber(Channel::Peer, None).await;
        let batcher = fx.batcher(Duration::from_millis(20), 50);

        batcher.start();
        batcher.start();
        assert!(batcher.is_running());

        batcher
            .add_message(Channel::Peer, Event::PeerConnected, &json!({"id": "p1"}), None)
            .await
            .expect("add");

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer flush")
            .expect("message");
        assert_eq!(batch_payload(message)["messages"], json!([{"id": "p1"}]));

        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_pending() {
        let fx = fixture();
        let mut rx = fx.subscriber(Channel::Wallet, None).await;
        let batcher = fx.batcher(Duration::from_secs(60), 50);
        batcher.start();

        batcher
            .add_message(Channel::Wallet, Event::BalanceUpdate, &json!({"asset": "BTC"}), None)
            .await
            .expect("add");

        assert_eq!(batcher.stop().await, 1);
        assert!(!batcher.is_running());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_compressed_flush() {
        let fx = fixture();
        let mut rx = fx.subscriber(Channel::Trades, None).await;
        let compressor = Arc::new(MessageCompressor::new(CompressionAlgorithm::Gzip, 0, 6));
        let batcher = MessageBatcher::new(
            Arc::clone(&fx.manager),
            Some(Arc::clone(&compressor)),
            Arc::clone(&fx.clock),
            Duration::from_secs(60),
            50,
        );

        batcher
            .add_message(Channel::Trades, Event::TradeCompleted, &json!({"id": 7}), None)
            .await
            .expect("add");
        batcher.flush_all().await;

        let payload = batch_payload(rx.try_recv().expect("batch"));
        assert!(MessageCompressor::is_compressed(&payload));
        let restored = compressor.try_decompress(&payload).expect("decompress");
        assert_eq!(restored["messages"], json!([{"id": 7}]));
    }

    #[tokio::test]
    async fn test_from_config_attaches_compressor() {
        let fx = fixture();
        let config = FeedConfig::default();
        let batcher = MessageBatcher::from_config(&config, Arc::clone(&fx.manager), Arc::clone(&fx.clock));
        assert!(batcher.compressor.is_none());

        let config = FeedConfig::default().with_compression(CompressionAlgorithm::Brotli, 10, 5);
        let batcher = MessageBatcher::from_config(&config, Arc::clone(&fx.manager), Arc::clone(&fx.clock));
        assert!(batcher.compressor.is_some());
    }
}
