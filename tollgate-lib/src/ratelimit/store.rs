use async_trait::async_trait;
use thiserror::Error;

/// Arguments of one atomic check-and-increment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRequest {
    pub daily_key: String,
    pub minute_key: String,
    pub daily_limit: u64,
    /// Requests per minute plus burst
    pub minute_limit: u64,
    /// Expiry set on the daily counter when it is created
    pub daily_ttl_secs: u64,
    /// Expiry set on the minute counter when it is created
    pub minute_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
    /// Both counters were incremented
    Incremented,
    /// Daily quota exhausted, nothing incremented
    DailyExceeded,
    /// Minute ceiling reached, nothing incremented
    MinuteExceeded,
}

/// Counter values after the operation (after the increment when allowed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReply {
    pub outcome: CounterOutcome,
    pub daily_count: u64,
    pub minute_count: u64,
    /// Remaining lifetime of the daily counter, when the store knows it
    pub daily_ttl_secs: Option<u64>,
    pub minute_ttl_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("unexpected counter store reply: {0}")]
    Protocol(String),
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared store holding the per-tenant window counters.
///
/// `check_and_increment` must be atomic across every gateway instance that
/// shares the store: the daily check, the minute check and both increments
/// happen as one indivisible step.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn check_and_increment(
        &self,
        request: &CounterRequest,
    ) -> Result<CounterReply, CounterStoreError>;
}
