use std::time::Duration;

use redis::{RedisResult, Script, aio::ConnectionManager};

use crate::core::rate_limiter::{LimitInfo, bucket_ttl_secs};

/// Atomic leaky bucket: drain by elapsed whole requests, add one per call.
///
/// State per key is a hash `{level, last_leak}` with a TTL of
/// `ceil(capacity / leak_rate)` seconds (minimum one second).
const LEAKY_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local leak_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local window = tonumber(ARGV[4])

local bucket = redis.call("HMGET", key, "level", "last_leak")
local level = tonumber(bucket[1]) or 0
local last_leak = tonumber(bucket[2]) or now

local elapsed = now - last_leak
if elapsed > 0 then
    level = math.max(0, level - math.floor(elapsed * leak_rate))
    last_leak = now
end

if level < capacity then
    level = level + 1
    redis.call("HMSET", key, "level", level, "last_leak", last_leak)
    redis.call("EXPIRE", key, window)
    return {1, capacity - level, math.ceil((capacity - level) / leak_rate)}
else
    local wait_time = math.ceil((level - capacity + 1) / leak_rate)
    redis.call("HMSET", key, "level", level, "last_leak", last_leak)
    redis.call("EXPIRE", key, window)
    return {0, capacity - level, wait_time}
end
"#;

/// Leaky bucket rate limiter evaluated on the coordination store.
pub struct LeakyBucket {
    client: ConnectionManager,
    key_prefix: String,
    capacity: i64,
    leak_rate: i64,
    script: Script,
}

impl LeakyBucket {
    /// Create a new leaky bucket limiter.
    ///
    /// `capacity` bounds the queue depth, `leak_rate` the sustained
    /// requests-per-second drain.
    pub fn new(client: ConnectionManager, key_prefix: &str, capacity: i64, leak_rate: i64) -> Self {
        Self {
            client,
            key_prefix: key_prefix.to_string(),
            capacity,
            leak_rate,
            script: Script::new(LEAKY_BUCKET_SCRIPT),
        }
    }

    /// Check whether a request under `key` may proceed, filling one slot.
    pub async fn allow(&self, key: &str) -> RedisResult<LimitInfo> {
        let redis_key = format!("{}:{}", self.key_prefix, key);
        let now = chrono::Utc::now().timestamp();
        let window = bucket_ttl_secs(self.capacity, self.leak_rate);

        let mut conn = self.client.clone();
        let (allowed, remaining, reset_in): (i64, i64, i64) = self
            .script
            .key(&redis_key)
            .arg(self.capacity)
            .arg(self.leak_rate)
            .arg(now)
            .arg(window)
            .invoke_async(&mut conn)
            .await?;

        Ok(LimitInfo {
            allowed: allowed == 1,
            remaining: remaining.max(0),
            limit: self.capacity,
            reset_in: Duration::from_secs(reset_in.max(0) as u64),
        })
    }
}
