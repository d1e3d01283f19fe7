use std::time::Duration;

use redis::{RedisResult, Script, aio::ConnectionManager};

use crate::core::rate_limiter::{LimitInfo, bucket_ttl_secs};

/// Atomic token bucket: refill by elapsed whole tokens, consume one per call.
///
/// State per key is a hash `{tokens, last_refill}` with a TTL of
/// `ceil(bucket_size / refill_rate)` seconds, the time an idle bucket takes
/// to refill completely.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local bucket_size = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local window = tonumber(ARGV[4])

local bucket = redis.call("HMGET", key, "tokens", "last_refill")
local tokens = tonumber(bucket[1]) or bucket_size
local last_refill = tonumber(bucket[2]) or now

local elapsed = now - last_refill
if elapsed > 0 then
    tokens = math.min(bucket_size, tokens + math.floor(elapsed * refill_rate))
    last_refill = now
end

if tokens >= 1 then
    tokens = tokens - 1
    redis.call("HMSET", key, "tokens", tokens, "last_refill", last_refill)
    redis.call("EXPIRE", key, window)
    return {1, tokens, math.ceil((bucket_size - tokens) / refill_rate)}
else
    local wait_time = math.ceil((1 - tokens) / refill_rate)
    redis.call("HMSET", key, "tokens", tokens, "last_refill", last_refill)
    redis.call("EXPIRE", key, window)
    return {0, tokens, wait_time}
end
"#;

/// Token bucket rate limiter evaluated on the coordination store.
pub struct TokenBucket {
    client: ConnectionManager,
    key_prefix: String,
    bucket_size: i64,
    refill_rate: i64,
    script: Script,
}

impl TokenBucket {
    /// Create a new token bucket limiter.
    ///
    /// `bucket_size` is the burst capacity, `refill_rate` the sustained
    /// tokens-per-second rate.
    pub fn new(
        client: ConnectionManager,
        key_prefix: &str,
        bucket_size: i64,
        refill_rate: i64,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.to_string(),
            bucket_size,
            refill_rate,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }

    /// Check whether a request under `key` may proceed, consuming a token.
    pub async fn allow(&self, key: &str) -> RedisResult<LimitInfo> {
        let redis_key = format!("{}:{}", self.key_prefix, key);
        let now = chrono::Utc::now().timestamp();
        let window = bucket_ttl_secs(self.bucket_size, self.refill_rate);

        let mut conn = self.client.clone();
        let (allowed, remaining, reset_in): (i64, i64, i64) = self
            .script
            .key(&redis_key)
            .arg(self.bucket_size)
            .arg(self.refill_rate)
            .arg(now)
            .arg(window)
            .invoke_async(&mut conn)
            .await?;

        Ok(LimitInfo {
            allowed: allowed == 1,
            remaining: remaining.max(0),
            limit: self.bucket_size,
            reset_in: Duration::from_secs(reset_in.max(0) as u64),
        })
    }
}
