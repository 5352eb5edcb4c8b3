//! Fixed-window request limiting per client identity
//!
//! Each identity gets a [`RateWindowCounter`] stored in a [`TtlCache`] whose
//! entry TTL equals the window length. An admitted request increments the
//! counter in place and re-arms the entry for a full window, so a client
//! that keeps sending requests under the limit keeps its window alive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::cache::{CacheStatsSnapshot, TtlCache};

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Request count inside the current window of one identity
#[derive(Debug, Clone, Copy)]
pub struct RateWindowCounter {
    /// Requests admitted in this window
    pub count: u32,
    /// When the window ends, kept in step with the cache entry's expiry
    pub window_expires_at: Instant,
}

/// Per-identity fixed-window rate limiter.
pub struct RateLimiter {
    counters: Arc<TtlCache<String, RateWindowCounter>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Create a limiter with the given window length
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            counters: Arc::new(TtlCache::new()),
            window,
        }
    }

    /// Window length
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or refuse one request from `identity`.
    ///
    /// The first request of a window is always admitted, whatever `limit`.
    pub fn allow(&self, identity: &str, limit: u32) -> bool {
        let window = self.window;
        self.counters
            .update(format!("ratelimit:{identity}"), |slot| {
                if let Some(counter) = slot.as_mut() {
                    if counter.count >= limit {
                        return (false, None);
                    }
                    counter.count += 1;
                    counter.window_expires_at = Instant::now() + window;
                } else {
                    *slot = Some(RateWindowCounter {
                        count: 1,
                        window_expires_at: Instant::now() + window,
                    });
                }
                (true, Some(window))
            })
    }

    /// Current counter for `identity`, if its window is live
    #[must_use]
    pub fn counter(&self, identity: &str) -> Option<RateWindowCounter> {
        self.counters.get(format!("ratelimit:{identity}").as_str())
    }

    /// Forget every counter
    pub fn reset(&self) {
        self.counters.clear();
    }

    /// Start background reclamation of expired windows
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        self.counters.spawn_sweeper(period)
    }

    /// Statistics of the counter cache
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.counters.stats()
    }
}
