//! Fixed-window request counter keyed by caller identity.
//!
//! Each key gets a window that opens on its first request and admits at most
//! `max_requests` until it expires. Expired windows are swept by `cleanup`,
//! which `spawn_cleanup` runs on an interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started_at: DateTime<Utc>,
}

/// Fixed-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per `window` for each key.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    fn expires_at(&self, window: &Window) -> DateTime<Utc> {
        window
            .started_at
            .checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Records a request for `key` and returns whether it is admitted.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock();

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });

        if now >= self.expires_at(entry) {
            *entry = Window {
                count: 0,
                started_at: now,
            };
        }

        if entry.count >= self.max_requests {
            debug!(key, count = entry.count, "Rate limit exceeded");
            return false;
        }

        entry.count += 1;
        true
    }

    /// Returns the requests left for `key` in its current window.
    #[must_use]
    pub fn get_remaining(&self, key: &str) -> u32 {
        let now = self.clock.now();
        let windows = self.windows.lock();

        match windows.get(key) {
            Some(w) if now < self.expires_at(w) => self.max_requests.saturating_sub(w.count),
            _ => self.max_requests,
        }
    }

    /// Returns when the current window for `key` ends. A key without an
    /// active window resets immediately.
    #[must_use]
    pub fn get_reset_time(&self, key: &str) -> DateTime<Utc> {
        let now = self.clock.now();
        let windows = self.windows.lock();

        match windows.get(key) {
            Some(w) if now < self.expires_at(w) => self.expires_at(w),
            _ => now,
        }
    }

    /// Drops the window for `key`.
    pub fn reset(&self, key: &str) {
        self.windows.lock().remove(key);
    }

    /// Removes every expired window and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let before = windows.len();

        windows.retain(|_, w| now < self.expires_at(w));

        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "Rate limiter windows expired");
        }
        removed
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }

    /// Spawns a task that calls `cleanup` every `interval`.
    #[must_use]
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.cleanup();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max: u32, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(
            max,
            Duration::from_millis(window_ms),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (limiter, clock)
    }

    #[test]
    fn test_allows_up_to_max() {
        let (limiter, _clock) = limiter(3, 1000);

        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        assert_eq!(limiter.get_remaining("a"), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(1, 1000);

        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let (limiter, clock) = limiter(1, 1000);

        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));

        clock.advance(chrono::Duration::milliseconds(1000));

        assert!(limiter.is_allowed("a"));
    }

    #[test]
    fn test_remaining_and_reset_time() {
        let (limiter, clock) = limiter(5, 1000);
        let start = clock.now();

        assert_eq!(limiter.get_remaining("a"), 5);
        assert_eq!(limiter.get_reset_time("a"), start);

        limiter.is_allowed("a");
        limiter.is_allowed("a");

        assert_eq!(limiter.get_remaining("a"), 3);
        assert_eq!(
            limiter.get_reset_time("a"),
            start + chrono::Duration::milliseconds(1000)
        );

        clock.advance(chrono::Duration::milliseconds(1500));
        assert_eq!(limiter.get_remaining("a"), 5);
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let (limiter, clock) = limiter(5, 1000);

        limiter.is_allowed("a");
        clock.advance(chrono::Duration::milliseconds(600));
        limiter.is_allowed("b");
        clock.advance(chrono::Duration::milliseconds(500));

        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_reset_key() {
        let (limiter, _clock) = limiter(1, 1000);

        assert!(limiter.is_allowed("a"));
        limiter.reset("a");
        assert!(limiter.is_allowed("a"));
    }
}
