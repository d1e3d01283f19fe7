use std::time::Duration;

use redis::{RedisResult, Script, aio::ConnectionManager};

use crate::core::rate_limiter::LimitInfo;

/// Atomic sliding window: a sorted set of request timestamps per key.
///
/// Entries older than the window are pruned, the remaining cardinality is
/// compared against the limit, and an admitted request is recorded with a
/// unique member (score = unix seconds) so same-second requests are counted
/// individually. On denial the wait is the time until the oldest entry falls
/// out of the window. TTL is re-armed to the window width on every admission.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window_size = tonumber(ARGV[3])
local member = ARGV[4]
local window_start = now - window_size

redis.call("ZREMRANGEBYSCORE", key, 0, window_start)
local current = redis.call("ZCARD", key)

if current < limit then
    redis.call("ZADD", key, now, member)
    redis.call("EXPIRE", key, window_size)
    return {1, limit - current - 1, window_size}
else
    local oldest = redis.call("ZRANGE", key, 0, 0, "WITHSCORES")
    local wait_time = window_size
    if oldest and #oldest > 0 then
        local oldest_time = tonumber(oldest[2])
        wait_time = math.ceil(oldest_time + window_size - now)
    end
    return {0, 0, wait_time}
end
"#;

/// Sliding window rate limiter evaluated on the coordination store.
pub struct SlidingWindow {
    client: ConnectionManager,
    key_prefix: String,
    limit: i64,
    window_size: Duration,
    script: Script,
}

impl SlidingWindow {
    /// Create a new sliding window limiter admitting at most `limit` requests
    /// in any window of `window_size`.
    pub fn new(
        client: ConnectionManager,
        key_prefix: &str,
        limit: i64,
        window_size: Duration,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.to_string(),
            limit,
            window_size,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    /// Check whether a request under `key` fits in the current window.
    pub async fn allow(&self, key: &str) -> RedisResult<LimitInfo> {
        let redis_key = format!("{}:{}", self.key_prefix, key);
        let now = chrono::Utc::now().timestamp();
        let window_secs = self.window_size.as_secs().max(1) as i64;
        // Unique member per admission; the score carries the timestamp
        let member = format!("{now}-{}", uuid::Uuid::new_v4());

        let mut conn = self.client.clone();
        let (allowed, remaining, reset_in): (i64, i64, i64) = self
            .script
            .key(&redis_key)
            .arg(self.limit)
            .arg(now)
            .arg(window_secs)
            .arg(&member)
            .invoke_async(&mut conn)
            .await?;

        Ok(LimitInfo {
            allowed: allowed == 1,
            remaining: remaining.max(0),
            limit: self.limit,
            reset_in: Duration::from_secs(reset_in.max(0) as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_shape() {
        // Prune, count, then either record or report the wait; all in one
        // atomic evaluation.
        assert!(SLIDING_WINDOW_SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(SLIDING_WINDOW_SCRIPT.contains("ZCARD"));
        assert!(SLIDING_WINDOW_SCRIPT.contains("ZADD"));
        assert!(SLIDING_WINDOW_SCRIPT.contains("WITHSCORES"));
        // The wait ends when the oldest entry leaves the window
        assert!(SLIDING_WINDOW_SCRIPT.contains("oldest_time + window_size - now"));
    }
}
