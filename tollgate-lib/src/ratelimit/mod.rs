//! Distributed dual-window rate limiting.

mod limiter;
mod memory;
mod redis_store;
mod store;
mod window;

pub use limiter::{
    Admission, DistributedRateLimiter, LimitType, RateLimitDecision, RateLimitError,
};
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{CounterOutcome, CounterReply, CounterRequest, CounterStore, CounterStoreError};
pub use window::{
    daily_key, epoch_minute, minute_key, seconds_until_next_minute, seconds_until_utc_midnight,
};
