use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::info;

use super::store::{CounterOutcome, CounterReply, CounterRequest, CounterStore, CounterStoreError};

/// KEYS[1] daily counter, KEYS[2] minute counter
/// ARGV[1] daily limit, ARGV[2] minute limit (rpm + burst),
/// ARGV[3] daily ttl, ARGV[4] minute ttl
///
/// Returns {allowed, reason, daily, minute, ttl(daily), ttl(minute)} where
/// reason is 0 = incremented, 1 = daily exceeded, 2 = minute exceeded.
const CHECK_AND_INCREMENT: &str = r"
local daily = tonumber(redis.call('GET', KEYS[1]) or '0')
local minute = tonumber(redis.call('GET', KEYS[2]) or '0')

if daily >= tonumber(ARGV[1]) then
    return {0, 1, daily, minute, redis.call('TTL', KEYS[1]), redis.call('TTL', KEYS[2])}
end
if minute >= tonumber(ARGV[2]) then
    return {0, 2, daily, minute, redis.call('TTL', KEYS[1]), redis.call('TTL', KEYS[2])}
end

daily = redis.call('INCR', KEYS[1])
if daily == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[3])
end
minute = redis.call('INCR', KEYS[2])
if minute == 1 then
    redis.call('EXPIRE', KEYS[2], ARGV[4])
end
return {1, 0, daily, minute, redis.call('TTL', KEYS[1]), redis.call('TTL', KEYS[2])}
";

/// Counter store shared by every gateway instance, one script call per request
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(tls = url.starts_with("rediss://"), "connected to redis counter store");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn, script: Script::new(CHECK_AND_INCREMENT) }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_increment(
        &self,
        request: &CounterRequest,
    ) -> Result<CounterReply, CounterStoreError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .script
            .key(&request.daily_key)
            .key(&request.minute_key)
            .arg(request.daily_limit)
            .arg(request.minute_limit)
            .arg(request.daily_ttl_secs)
            .arg(request.minute_ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        parse_reply(&reply)
    }
}

fn parse_reply(reply: &[i64]) -> Result<CounterReply, CounterStoreError> {
    let &[allowed, reason, daily, minute, daily_ttl, minute_ttl] = reply else {
        return Err(CounterStoreError::Protocol(format!(
            "expected 6 values, got {}",
            reply.len()
        )));
    };
    let outcome = match (allowed, reason) {
        (1, 0) => CounterOutcome::Incremented,
        (0, 1) => CounterOutcome::DailyExceeded,
        (0, 2) => CounterOutcome::MinuteExceeded,
        other => {
            return Err(CounterStoreError::Protocol(format!("unknown outcome {other:?}")));
        }
    };
    // TTL answers -1 (no expiry) or -2 (no key)
    let ttl = |v: i64| u64::try_from(v).ok();
    Ok(CounterReply {
        outcome,
        daily_count: u64::try_from(daily).unwrap_or(0),
        minute_count: u64::try_from(minute).unwrap_or(0),
        daily_ttl_secs: ttl(daily_ttl),
        minute_ttl_secs: ttl(minute_ttl),
    })
}
