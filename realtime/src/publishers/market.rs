//! Periodic market snapshot refresh.
//!
//! Publishes the orderbook and ticker for every trading pair on a fixed
//! interval. A pair that fails is logged and skipped until the next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{OrderbookPublisher, TickerPublisher};
use crate::error::{Result, StoreError};
use crate::store::{DataStore, TradingPair};

/// Outcome of one publishing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Pairs whose orderbook and ticker were both published.
    pub published: usize,
    /// Pairs that failed.
    pub failed: Vec<TradingPair>,
}

impl PublishReport {
    /// Returns true if every pair was published.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives the orderbook and ticker publishers on a timer.
#[derive(Debug)]
pub struct MarketPublisher {
    store: Arc<dyn DataStore>,
    orderbook: OrderbookPublisher,
    ticker: TickerPublisher,
    timer: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MarketPublisher {
    /// Creates a new market publisher. The timer is not started.
    #[must_use]
    pub fn new(
        store: Arc<dyn DataStore>,
        orderbook: OrderbookPublisher,
        ticker: TickerPublisher,
    ) -> Self {
        Self {
            store,
            orderbook,
            ticker,
            timer: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Publishes orderbook and ticker for every trading pair once.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pair list cannot be loaded; per-pair
    /// failures are reported in the returned [`PublishReport`].
    pub async fn publish_all(&self) -> std::result::Result<PublishReport, StoreError> {
        let pairs = self.store.trading_pairs().await?;
        let mut report = PublishReport::default();

        for pair in pairs {
            match self.publish_pair(&pair).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    error!(pair = %pair, "Failed to publish market data: {}", e);
                    report.failed.push(pair);
                }
            }
        }

        debug!(
            published = report.published,
            failed = report.failed.len(),
            "Market publish pass complete"
        );
        Ok(report)
    }

    async fn publish_pair(&self, pair: &TradingPair) -> Result<()> {
        self.orderbook
            .publish_orderbook_update(&pair.base_asset, &pair.quote_asset)
            .await?;
        self.ticker
            .publish_ticker_data(&pair.base_asset, &pair.quote_asset)
            .await?;
        Ok(())
    }

    /// Runs one pass immediately, then repeats every `interval`.
    ///
    /// Calling it again while running is a no-op.
    pub fn start_periodic_updates(self: &Arc<Self>, interval: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let publisher: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(publisher) = publisher.upgrade() else {
                    break;
                };
                if let Err(e) = publisher.publish_all().await {
                    error!("Failed to load trading pairs: {}", e);
                }
            }
        });

        *self.timer.lock() = Some(handle);
        info!(interval_ms = period.as_millis() as u64, "Periodic market updates started");
    }

    /// Cancels the periodic timer.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            info!("Periodic market updates stopped");
        }
    }

    /// Returns true if the periodic timer is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MarketPublisher {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}
