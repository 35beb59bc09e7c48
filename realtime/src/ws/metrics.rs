//! WebSocket metrics tracking.
//!
//! Provides atomic counters and a bounded latency ring buffer for monitoring
//! connections, subscriptions and message flow. The collector only observes:
//! it never mutates the components that report to it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::DEFAULT_LATENCY_CAPACITY;
use crate::error::ErrorKind;

/// Gauge with running total and high-water mark.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicU64,
    total: AtomicU64,
    peak: AtomicU64,
}

impl Gauge {
    fn increment(&self) {
        let current = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.total.fetch_add(1, Ordering::Relaxed);
        self.peak.fetch_max(current, Ordering::Relaxed);
    }

    fn decrement_by(&self, n: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(n))
            });
    }

    fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            current: self.current.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
    }
}

/// Metrics collector for the realtime layer.
#[derive(Debug)]
pub struct MetricsCollector {
    connections: Gauge,
    subscriptions: Gauge,

    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,

    connection_errors: AtomicU64,
    authentication_errors: AtomicU64,
    subscription_errors: AtomicU64,
    message_errors: AtomicU64,

    authentications: AtomicU64,

    /// Latency samples in milliseconds, oldest first.
    latencies: Mutex<VecDeque<f64>>,
    latency_capacity: usize,

    start_time: Mutex<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl MetricsCollector {
    /// Creates a collector retaining `latency_capacity` latency samples.
    #[must_use]
    pub fn new(latency_capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let latency_capacity = latency_capacity.max(1);
        Self {
            connections: Gauge::default(),
            subscriptions: Gauge::default(),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            authentication_errors: AtomicU64::new(0),
            subscription_errors: AtomicU64::new(0),
            message_errors: AtomicU64::new(0),
            authentications: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(latency_capacity)),
            latency_capacity,
            start_time: Mutex::new(clock.now()),
            clock,
        }
    }

    /// Creates a collector with the default latency capacity.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(DEFAULT_LATENCY_CAPACITY, clock)
    }

    /// Records a connection opened.
    pub fn record_connection(&self) {
        self.connections.increment();
    }

    /// Records a connection closed that held `subscriptions` subscriptions.
    pub fn record_disconnection(&self, subscriptions: usize) {
        self.connections.decrement_by(1);
        self.subscriptions.decrement_by(subscriptions as u64);
    }

    /// Records an error of the given kind.
    pub fn record_error(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Connection => &self.connection_errors,
            ErrorKind::Authentication => &self.authentication_errors,
            ErrorKind::Subscription => &self.subscription_errors,
            ErrorKind::Message => &self.message_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful authentication.
    pub fn record_auth_success(&self) {
        self.authentications.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed authentication.
    pub fn record_auth_failure(&self) {
        self.record_error(ErrorKind::Authentication);
    }

    /// Records a new subscription.
    pub fn record_subscription(&self) {
        self.subscriptions.increment();
    }

    /// Records a removed subscription.
    pub fn record_unsubscription(&self) {
        self.subscriptions.decrement_by(1);
    }

    /// Records a subscription rejected by the rate limiter or validation.
    pub fn record_subscription_denied(&self) {
        self.record_error(ErrorKind::Subscription);
    }

    /// Records an inbound message.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` outbound deliveries.
    pub fn record_messages_sent(&self, count: u64) {
        self.messages_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an outbound delivery dropped because the client queue was full
    /// or closed.
    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a handling latency sample in milliseconds, evicting the oldest
    /// sample once the buffer is full.
    pub fn record_latency(&self, millis: f64) {
        let mut latencies = self.latencies.lock();
        if latencies.len() >= self.latency_capacity {
            latencies.pop_front();
        }
        latencies.push_back(millis);
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections.current.load(Ordering::Relaxed)
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions.current.load(Ordering::Relaxed)
    }

    /// Returns the total messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the total messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns the configured latency capacity.
    #[must_use]
    pub const fn latency_capacity(&self) -> usize {
        self.latency_capacity
    }

    /// Returns the number of retained latency samples.
    #[must_use]
    pub fn latency_samples(&self) -> usize {
        self.latencies.lock().len()
    }

    /// Returns the uptime in milliseconds.
    #[must_use]
    pub fn uptime_ms(&self) -> i64 {
        let start = *self.start_time.lock();
        (self.clock.now() - start).num_milliseconds().max(0)
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.snapshot(),
            messages: MessageSnapshot {
                sent: self.messages_sent(),
                received: self.messages_received(),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
            },
            subscriptions: self.subscriptions.snapshot(),
            errors: ErrorSnapshot {
                connection: self.connection_errors.load(Ordering::Relaxed),
                authentication: self.authentication_errors.load(Ordering::Relaxed),
                subscription: self.subscription_errors.load(Ordering::Relaxed),
                message: self.message_errors.load(Ordering::Relaxed),
            },
            authentications: self.authentications.load(Ordering::Relaxed),
            latency: self.latency_snapshot(),
            uptime_ms: self.uptime_ms(),
            start_time: *self.start_time.lock(),
        }
    }

    /// Resets all counters, clears latency samples and restarts uptime.
    pub fn reset_metrics(&self) {
        self.connections.reset();
        self.subscriptions.reset();
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_dropped.store(0, Ordering::Relaxed);
        self.connection_errors.store(0, Ordering::Relaxed);
        self.authentication_errors.store(0, Ordering::Relaxed);
        self.subscription_errors.store(0, Ordering::Relaxed);
        self.message_errors.store(0, Ordering::Relaxed);
        self.authentications.store(0, Ordering::Relaxed);
        self.latencies.lock().clear();
        *self.start_time.lock() = self.clock.now();
    }

    fn latency_snapshot(&self) -> LatencySnapshot {
        let latencies = self.latencies.lock();
        if latencies.is_empty() {
            return LatencySnapshot::default();
        }

        let (sum, min, max) = latencies.iter().fold(
            (0.0_f64, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), &v| (sum + v, min.min(v), max.max(v)),
        );

        LatencySnapshot {
            average: sum / latencies.len() as f64,
            min,
            max,
            samples: latencies.len(),
        }
    }
}

/// Current, total and peak values of a gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GaugeSnapshot {
    /// Current value.
    pub current: u64,
    /// Total increments since start.
    pub total: u64,
    /// Highest current value observed.
    pub peak: u64,
}

/// Message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageSnapshot {
    /// Outbound deliveries.
    pub sent: u64,
    /// Inbound messages.
    pub received: u64,
    /// Outbound deliveries dropped by back-pressure.
    pub dropped: u64,
}

/// Error counters by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSnapshot {
    /// Transport errors.
    pub connection: u64,
    /// Authentication failures.
    pub authentication: u64,
    /// Subscription denials.
    pub subscription: u64,
    /// Malformed messages.
    pub message: u64,
}

/// Latency statistics over the retained samples, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    /// Mean latency.
    pub average: f64,
    /// Minimum latency.
    pub min: f64,
    /// Maximum latency.
    pub max: f64,
    /// Number of retained samples.
    pub samples: usize,
}

/// A point-in-time snapshot of realtime metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Connection gauge.
    pub connections: GaugeSnapshot,
    /// Message counters.
    pub messages: MessageSnapshot,
    /// Subscription gauge.
    pub subscriptions: GaugeSnapshot,
    /// Error counters.
    pub errors: ErrorSnapshot,
    /// Successful authentications.
    pub authentications: u64,
    /// Latency statistics.
    pub latency: LatencySnapshot,
    /// Milliseconds since start or last reset.
    pub uptime_ms: i64,
    /// Start or last reset time.
    pub start_time: DateTime<Utc>,
}
