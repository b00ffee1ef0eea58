//! Redis-backed GCRA admission store.
//!
//! The test-and-update runs as a single Lua script, so concurrent proxies
//! sharing one Redis never double-admit. The stored value is the key's
//! theoretical arrival time, expiring once the key is fully refilled.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::rate_limit::{Limit, LimiterError, RateLimitStore};

const GCRA_SCRIPT: &str = r#"
redis.replicate_commands()

local key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])

local emission_interval = period / rate
local burst_offset = emission_interval * burst

local jan_1_2017 = 1483228800
local now = redis.call("TIME")
now = (now[1] - jan_1_2017) + (now[2] / 1000000)

local tat = redis.call("GET", key)
if not tat then
  tat = now
else
  tat = tonumber(tat)
end
tat = math.max(tat, now)

local new_tat = tat + emission_interval
local allow_at = new_tat - burst_offset
if now - allow_at < 0 then
  return 0
end

local reset_after = new_tat - now
if reset_after > 0 then
  redis.call("SET", key, new_tat, "EX", math.ceil(reset_after))
end
return 1
"#;

/// Admission store shared across proxy instances through Redis.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    connection: ConnectionManager,
    script: Script,
    prefix: String,
}

impl RedisRateLimitStore {
    /// Connect to `redis_url`; keys are written under `prefix`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, LimiterError> {
        let client = redis::Client::open(redis_url).map_err(store_error)?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(store_error)?;

        tracing::info!(redis_url = %redis_url, "Connected to rate limit store");

        Ok(Self {
            connection,
            script: Script::new(GCRA_SCRIPT),
            prefix: prefix.into(),
        })
    }

    /// Drop every key in the selected database.
    pub async fn flush(&self) -> Result<(), LimiterError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        tracing::warn!("Flushed rate limit store");
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn try_consume(&self, key: &str, limit: &Limit) -> Result<bool, LimiterError> {
        // Validates the limit before touching Redis.
        limit.emission_interval()?;

        let mut conn = self.connection.clone();
        let allowed: i64 = self
            .script
            .key(format!("{}{}", self.prefix, key))
            .arg(limit.burst)
            .arg(limit.rate)
            .arg(limit.period.as_secs_f64())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(allowed == 1)
    }
}

fn store_error(err: redis::RedisError) -> LimiterError {
    LimiterError::Store(err.to_string())
}
