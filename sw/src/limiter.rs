//! Keyed token-bucket admission control
//!
//! One bucket per key, created lazily at full capacity. Refill happens in
//! whole intervals only: the fractional remainder of elapsed time stays
//! accrued on the bucket clock instead of being thrown away, so callers that
//! poll just under the interval boundary are not starved.
//!
//! Time comes from `tokio::time::Instant`, which follows the paused test
//! clock under `start_paused` runtimes.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Token bucket parameters, immutable after construction
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Bucket capacity, also the burst size
    pub max_tokens: f64,

    /// Tokens restored per refill interval
    pub refill_rate: f64,

    /// Length of one refill interval
    pub refill_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 1.0,
            refill_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the tokens were granted
    pub allowed: bool,

    /// Whole tokens left in the bucket after this attempt
    pub tokens_remaining: u64,

    /// On denial, how long until enough tokens will have refilled
    pub retry_after: Option<Duration>,
}

/// Per-key bucket state
#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_at: Instant,
}

impl Bucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill_at: now,
        }
    }

    /// Credit whole elapsed intervals, advancing the bucket clock by exactly
    /// the intervals credited
    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let interval = config.refill_interval;
        if interval.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        let whole = (elapsed.as_nanos() / interval.as_nanos()).min(u128::from(u32::MAX)) as u32;
        if whole > 0 {
            self.tokens = (self.tokens + f64::from(whole) * config.refill_rate).min(config.max_tokens);
            self.last_refill_at += interval * whole;
        }
    }

    /// Time until `needed` more tokens will have accrued
    fn time_to_tokens(&self, config: &RateLimitConfig, needed: f64) -> Duration {
        // A zero refill rate never recovers; one interval is the honest floor
        let refills = if config.refill_rate > 0.0 {
            (needed / config.refill_rate).ceil().max(1.0)
        } else {
            1.0
        };
        config.refill_interval.mul_f64(refills)
    }
}

/// Keyed token-bucket rate limiter
///
/// Shared by reference across callers; all methods lock internally.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with the given bucket parameters
    pub fn new(config: RateLimitConfig) -> Self {
        debug!(?config, "RateLimiter::new: called");
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take `tokens` from the key's bucket
    ///
    /// Denial leaves the bucket untouched and reports how long until the
    /// request could succeed. The refill that precedes the check does apply
    /// either way; it is an observation of elapsed time, not a side effect of
    /// this particular request.
    pub async fn consume(&self, key: &str, tokens: f64) -> Admission {
        debug!(%key, tokens, "RateLimiter::consume: called");
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(&self.config, now));
        bucket.refill(&self.config, now);

        if bucket.tokens >= tokens {
            bucket.tokens -= tokens;
            debug!(%key, remaining = bucket.tokens, "RateLimiter::consume: allowed");
            Admission {
                allowed: true,
                tokens_remaining: bucket.tokens.floor() as u64,
                retry_after: None,
            }
        } else {
            let retry_after = bucket.time_to_tokens(&self.config, tokens - bucket.tokens);
            debug!(%key, available = bucket.tokens, ?retry_after, "RateLimiter::consume: denied");
            Admission {
                allowed: false,
                tokens_remaining: bucket.tokens.floor() as u64,
                retry_after: Some(retry_after),
            }
        }
    }

    /// Whole tokens currently available for the key, after refill
    pub async fn get_tokens(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(&self.config, now));
        bucket.refill(&self.config, now);
        bucket.tokens.floor() as u64
    }

    /// Restore the key's bucket to full capacity
    pub async fn reset(&self, key: &str) {
        debug!(%key, "RateLimiter::reset: called");
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets.insert(key.to_string(), Bucket::full(&self.config, now));
    }
}
