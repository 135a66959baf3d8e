//! Rate-limit aware retry wrapper around remote calls
//!
//! All execute traffic funnels through [`RetryingExecutor`], which checks the
//! local token bucket before every attempt and backs off exponentially on
//! either a local denial or a remote 429. Tokens spent on an attempt that
//! comes back 429 are not refunded, so a throttling service drains the local
//! budget too.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::api::ApiError;
use crate::limiter::{RateLimitConfig, RateLimiter};

/// Retry policy for rate-limited calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (so max_retries + 1 attempts total)
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt
    pub base_delay: Duration,
    /// Ceiling on any single backoff sleep
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Executes operations through the local limiter with retry-on-throttle
pub struct RetryingExecutor {
    limiter: RateLimiter,
    config: RetryConfig,
}

impl RetryingExecutor {
    pub fn new(limit_config: RateLimitConfig, config: RetryConfig) -> Self {
        Self {
            limiter: RateLimiter::new(limit_config),
            config,
        }
    }

    /// The limiter backing this executor, for inspection
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run `op` under the rate limit for `key`, retrying on throttle
    ///
    /// Each attempt costs one token. A local denial waits out the limiter's
    /// hint (floored at base_delay) scaled by the attempt number; a remote
    /// 429 backs off from base_delay alone. Any other error propagates
    /// immediately. When the retry budget runs out the caller gets
    /// [`ApiError::RateLimitExceeded`] for a local denial or the final
    /// [`ApiError::RateLimited`] from the service.
    pub async fn execute<T, F, Fut>(&self, key: &str, op: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        debug!(%key, "RetryingExecutor::execute: called");
        let mut attempt: u32 = 0;

        loop {
            let admission = self.limiter.consume(key, 1.0).await;
            if !admission.allowed {
                let hint = admission.retry_after.unwrap_or(self.config.base_delay);
                if attempt >= self.config.max_retries {
                    debug!(%key, attempt, "RetryingExecutor::execute: local budget exhausted");
                    return Err(ApiError::RateLimitExceeded { retry_after: hint });
                }
                let delay = backoff_delay(hint.max(self.config.base_delay), attempt, self.config.max_delay);
                debug!(%key, attempt, ?delay, "RetryingExecutor::execute: denied locally, waiting");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(ApiError::RateLimited { retry_after }) => {
                    if attempt >= self.config.max_retries {
                        debug!(%key, attempt, "RetryingExecutor::execute: remote kept throttling");
                        return Err(ApiError::RateLimited { retry_after });
                    }
                    // The token spent on this attempt stays spent
                    let delay = backoff_delay(self.config.base_delay, attempt, self.config.max_delay);
                    debug!(%key, attempt, ?retry_after, ?delay, "RetryingExecutor::execute: got 429, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// base * 2^attempt, capped at max
fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}
