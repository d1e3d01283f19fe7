//! Distributed rate limiting on the coordination store.
//!
//! Exposes a small enum ([`RateLimiter`]) that encapsulates one of three
//! admission algorithms (token bucket, leaky bucket, sliding window) with
//! unified `allow` semantics returning a [`LimitInfo`]. Each algorithm is a
//! single Lua script evaluated atomically on Redis: one round trip reads,
//! updates and re-arms the TTL of the per-key state, so competing gateway
//! instances converge on one decision per key. A client-side
//! read-modify-write would not be a valid implementation.
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

use std::time::Duration;

use redis::{RedisResult, aio::ConnectionManager};

pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use crate::config::{RateLimitAlgorithm, RateLimitConfig};

/// Outcome of a single admission decision.
///
/// `reset_in` is the minimum wait before the next call can succeed; when
/// `allowed` is false it doubles as the Retry-After value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitInfo {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
    pub reset_in: Duration,
}

impl LimitInfo {
    /// Response headers (X-RateLimit-Limit / -Remaining / -Reset) for this
    /// decision, as lowercase wire names. `Retry-After` is present only on
    /// denial; the reset header carries the absolute unix epoch of reset.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let reset_at = chrono::Utc::now().timestamp() + self.reset_in.as_secs() as i64;
        let mut headers = vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", reset_at.to_string()),
        ];
        if !self.allowed {
            headers.push(("retry-after", self.reset_in.as_secs().to_string()));
        }
        headers
    }
}

/// Discriminated union over the supported admission algorithms.
pub enum RateLimiter {
    TokenBucket(TokenBucket),
    LeakyBucket(LeakyBucket),
    SlidingWindow(SlidingWindow),
}

impl RateLimiter {
    /// Build a limiter from configuration, sharing the given store handle.
    ///
    /// `bucket_size` doubles as the sliding-window limit and `refill_rate` as
    /// the leaky-bucket drain rate.
    pub fn from_config(client: ConnectionManager, config: &RateLimitConfig) -> Self {
        match config.algorithm {
            RateLimitAlgorithm::TokenBucket => RateLimiter::TokenBucket(TokenBucket::new(
                client,
                &config.key_prefix,
                config.bucket_size,
                config.refill_rate,
            )),
            RateLimitAlgorithm::LeakyBucket => RateLimiter::LeakyBucket(LeakyBucket::new(
                client,
                &config.key_prefix,
                config.bucket_size,
                config.refill_rate,
            )),
            RateLimitAlgorithm::SlidingWindow => RateLimiter::SlidingWindow(SlidingWindow::new(
                client,
                &config.key_prefix,
                config.bucket_size,
                Duration::from_secs(config.window_size_secs.max(1)),
            )),
        }
    }

    /// Check whether a request under `key` is admitted, consuming one unit.
    ///
    /// The decision is atomic across competing instances for the same key.
    /// On a store error the caller is expected to fail open.
    pub async fn allow(&self, key: &str) -> RedisResult<LimitInfo> {
        match self {
            RateLimiter::TokenBucket(limiter) => limiter.allow(key).await,
            RateLimiter::LeakyBucket(limiter) => limiter.allow(key).await,
            RateLimiter::SlidingWindow(limiter) => limiter.allow(key).await,
        }
    }

    /// Algorithm name used for the `rate_limit_hits_total` label.
    pub fn algorithm(&self) -> &'static str {
        match self {
            RateLimiter::TokenBucket(_) => RateLimitAlgorithm::TokenBucket.as_str(),
            RateLimiter::LeakyBucket(_) => RateLimitAlgorithm::LeakyBucket.as_str(),
            RateLimiter::SlidingWindow(_) => RateLimitAlgorithm::SlidingWindow.as_str(),
        }
    }
}

/// TTL in whole seconds for bucket-style state: `ceil(size / rate)`, floored
/// at one second so aggressive rates cannot produce a zero TTL.
pub(crate) fn bucket_ttl_secs(size: i64, rate: i64) -> i64 {
    if rate <= 0 {
        return 1;
    }
    let ttl = (size + rate - 1) / rate;
    ttl.max(1)
}
