use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::store::{CounterOutcome, CounterReply, CounterRequest, CounterStore, CounterStoreError};

const PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: Instant,
}

impl Counter {
    fn remaining_secs(&self, now: Instant) -> u64 {
        self.expires_at.saturating_duration_since(now).as_secs()
    }
}

/// Counter store local to one process.
///
/// The whole check-and-increment runs under one mutex with no await inside,
/// which gives the same atomicity as the Redis script for a single gateway.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<AHashMap<String, Counter>>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    /// Current value of a live counter
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let counters = self.counters.lock().ok()?;
        counters.get(key).filter(|c| c.expires_at > now).map(|c| c.value)
    }

    pub fn len(&self) -> usize {
        self.counters.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live(counters: &AHashMap<String, Counter>, key: &str, now: Instant) -> Option<Counter> {
    counters.get(key).copied().filter(|c| c.expires_at > now)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_increment(
        &self,
        request: &CounterRequest,
    ) -> Result<CounterReply, CounterStoreError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(CounterStoreError::Unavailable(
                "memory counter store marked unavailable".into(),
            ));
        }
        let now = Instant::now();
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| CounterStoreError::Unavailable("counter lock poisoned".into()))?;

        if counters.len() > PURGE_THRESHOLD {
            counters.retain(|_, c| c.expires_at > now);
        }

        let daily = live(&counters, &request.daily_key, now);
        let minute = live(&counters, &request.minute_key, now);
        let daily_count = daily.map_or(0, |c| c.value);
        let minute_count = minute.map_or(0, |c| c.value);

        let refused = if daily_count >= request.daily_limit {
            Some(CounterOutcome::DailyExceeded)
        } else if minute_count >= request.minute_limit {
            Some(CounterOutcome::MinuteExceeded)
        } else {
            None
        };
        if let Some(outcome) = refused {
            return Ok(CounterReply {
                outcome,
                daily_count,
                minute_count,
                daily_ttl_secs: daily.map(|c| c.remaining_secs(now)),
                minute_ttl_secs: minute.map(|c| c.remaining_secs(now)),
            });
        }

        let daily = bump(daily, now, request.daily_ttl_secs);
        let minute = bump(minute, now, request.minute_ttl_secs);
        counters.insert(request.daily_key.clone(), daily);
        counters.insert(request.minute_key.clone(), minute);

        Ok(CounterReply {
            outcome: CounterOutcome::Incremented,
            daily_count: daily.value,
            minute_count: minute.value,
            daily_ttl_secs: Some(daily.remaining_secs(now)),
            minute_ttl_secs: Some(minute.remaining_secs(now)),
        })
    }
}

/// Increment, creating the counter with its expiry when absent
fn bump(existing: Option<Counter>, now: Instant, ttl_secs: u64) -> Counter {
    match existing {
        Some(c) => Counter { value: c.value + 1, expires_at: c.expires_at },
        None => Counter { value: 1, expires_at: now + Duration::from_secs(ttl_secs) },
    }
}
