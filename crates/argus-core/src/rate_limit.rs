//! Per-source token-bucket rate limiting.
//!
//! One bucket per source, refilled continuously: a source configured at
//! `requests_per_minute = 60` earns one token per second, up to a burst
//! ceiling. `acquire` suspends the calling task for the exact deficit when
//! the bucket is empty; it never over-sleeps and never blocks sibling
//! sources, because the bucket map lock is released before sleeping.
//!
//! Under heavy contention on one source, wakeup order between waiting
//! callers is not FIFO: each caller recomputes its own wait against the
//! current token level. Documented tradeoff, not a bug.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::source::Source;

/// Limiter defaults for sources without a `requests_per_minute` override.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub default_per_minute: u32,
    /// Burst ceiling: tokens a bucket may hold after a long idle period.
    pub burst_capacity: u32,
}

impl Default for RateLimiterConfig {
    /// 30 requests/minute with a burst of 5, polite enough for government
    /// registries while keeping interactive searches snappy.
    fn default() -> Self {
        Self {
            default_per_minute: 30,
            burst_capacity: 5,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    refill_per_ms: f64,
}

impl TokenBucket {
    fn new(per_minute: u32, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            capacity,
            refill_per_ms: f64::from(per_minute) / 60_000.0,
        }
    }

    /// Add tokens earned since the last refill, clamped to capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as f64;
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        self.last_refill = now;
    }

    /// Exact wait until one full token is available, `None` if one already is.
    fn deficit(&self) -> Option<Duration> {
        if self.tokens >= 1.0 {
            return None;
        }
        let wait_ms = ((1.0 - self.tokens) / self.refill_per_ms).ceil();
        Some(Duration::from_millis(wait_ms as u64))
    }
}

/// Token-bucket rate limiter with one lazily-created bucket per source.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn per_minute_for(&self, source: &Source) -> u32 {
        source
            .config
            .requests_per_minute
            .unwrap_or(self.config.default_per_minute)
            .max(1)
    }

    /// Take one token for this source, suspending until one is available.
    ///
    /// The map lock is dropped while sleeping so other sources proceed
    /// unimpeded; after the sleep the bucket is refilled and re-checked,
    /// since a concurrent caller may have taken the token we waited for.
    pub async fn acquire(&self, source: &Source) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(source.id.clone()).or_insert_with(|| {
                    TokenBucket::new(self.per_minute_for(source), self.config.burst_capacity)
                });
                bucket.refill();
                match bucket.deficit() {
                    None => {
                        bucket.tokens -= 1.0;
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            tracing::debug!(
                source = %source.id,
                wait_ms = %wait.as_millis(),
                "Rate limit reached, suspending"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant: take a token if one is available right now.
    pub async fn try_acquire(&self, source: &Source) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(source.id.clone()).or_insert_with(|| {
            TokenBucket::new(self.per_minute_for(source), self.config.burst_capacity)
        });
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
