use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tollgate_lib::config::{FailurePolicy, RateLimitConfig};
use tollgate_lib::ratelimit::{
    daily_key, minute_key, Admission, CounterStore, DistributedRateLimiter, LimitType,
    MemoryCounterStore, RateLimitError,
};
use tollgate_lib::tenant::RateLimitSpec;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, second)
        .single()
        .unwrap_or_else(|| panic!("valid timestamp"))
}

fn limiter(store: Arc<MemoryCounterStore>, policy: FailurePolicy) -> DistributedRateLimiter {
    let config = RateLimitConfig { failure_policy: policy, ..RateLimitConfig::default() };
    let store: Arc<dyn CounterStore> = store;
    DistributedRateLimiter::new(store, &config)
}

#[test]
fn counter_keys_follow_naming_scheme() {
    let now = at(10, 30, 15);
    assert_eq!(daily_key("org_1", now), "ratelimit:{org_1}:daily:20260314");
    let expected_minute = now.timestamp() / 60;
    assert_eq!(
        minute_key("org_1", now),
        format!("ratelimit:{{org_1}}:minute:{expected_minute}")
    );
}

#[tokio::test]
async fn burst_extends_minute_window_only() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = limiter(Arc::clone(&store), FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(10, 100, 5);
    let now = at(10, 0, 5);

    for i in 1..=15u64 {
        let decision = limiter.check_and_increment_at("org_1", &spec, now).await?;
        assert!(decision.allowed, "request {i} should be admitted");
        assert_eq!(decision.minute_count, i);
        assert_eq!(decision.minute_remaining, 15 - i);
    }
    let denied = limiter.check_and_increment_at("org_1", &spec, now).await?;
    assert!(!denied.allowed);
    assert_eq!(denied.limit_type, Some(LimitType::Minute));
    assert_eq!(denied.minute_count, 15);
    assert_eq!(denied.daily_count, 15);
    assert_eq!(denied.reset_minute, 55);
    assert_eq!(denied.retry_after(), 55);

    // denied requests are not counted
    assert_eq!(store.get(&minute_key("org_1", now)), Some(15));
    assert_eq!(store.get(&daily_key("org_1", now)), Some(15));
    Ok(())
}

#[tokio::test]
async fn standard_tenant_gets_rate_plus_burst_per_minute() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = limiter(store, FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(1000, 100_000, 500);
    let now = at(14, 20, 0);

    let mut admitted = 0u64;
    for _ in 0..1500 {
        if limiter.check_and_increment_at("org_1", &spec, now).await?.allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1500);

    let denied = limiter.check_and_increment_at("org_1", &spec, now).await?;
    assert!(!denied.allowed);
    assert_eq!(denied.limit_type, Some(LimitType::Minute));
    assert_eq!(denied.minute_count, 1500);
    assert_eq!(denied.daily_remaining, 100_000 - 1500);
    Ok(())
}

#[tokio::test]
async fn new_minute_resets_minute_but_not_day() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = limiter(store, FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(2, 5, 0);

    for _ in 0..2 {
        assert!(limiter.check_and_increment_at("org_1", &spec, at(9, 0, 0)).await?.allowed);
    }
    let denied = limiter.check_and_increment_at("org_1", &spec, at(9, 0, 30)).await?;
    assert_eq!(denied.limit_type, Some(LimitType::Minute));

    for _ in 0..2 {
        assert!(limiter.check_and_increment_at("org_1", &spec, at(9, 1, 0)).await?.allowed);
    }
    let next = limiter.check_and_increment_at("org_1", &spec, at(9, 2, 0)).await?;
    assert!(next.allowed);
    assert_eq!(next.daily_count, 5);
    assert_eq!(next.daily_remaining, 0);

    let denied = limiter.check_and_increment_at("org_1", &spec, at(9, 3, 0)).await?;
    assert_eq!(denied.limit_type, Some(LimitType::Daily));
    assert_eq!(denied.retry_after(), denied.reset_daily);
    assert!(denied.reset_daily > 0);
    Ok(())
}

#[tokio::test]
async fn daily_limit_wins_when_both_are_exhausted() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = limiter(store, FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(3, 3, 0);
    let now = at(23, 59, 0);

    for _ in 0..3 {
        assert!(limiter.check_and_increment_at("org_1", &spec, now).await?.allowed);
    }
    let denied = limiter.check_and_increment_at("org_1", &spec, now).await?;
    assert_eq!(denied.limit_type, Some(LimitType::Daily));
    assert_eq!(denied.limit_type.map(|t| t.as_str()), Some("daily"));
    Ok(())
}

#[tokio::test]
async fn burst_never_raises_daily_ceiling() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = limiter(store, FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(10, 12, 50);
    let now = at(12, 0, 0);

    let mut admitted = 0;
    for _ in 0..30 {
        if limiter.check_and_increment_at("org_1", &spec, now).await?.allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 12);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_never_overshoot() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = Arc::new(limiter(store, FailurePolicy::FailOpen));
    let spec = RateLimitSpec::new(10, 100, 5);
    let now = at(15, 0, 0);

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let limiter = Arc::clone(&limiter);
        tasks.push(tokio::spawn(async move {
            limiter.check_and_increment_at("org_1", &spec, now).await
        }));
    }
    let mut admitted = 0;
    for task in tasks {
        if task.await??.allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 15);
    Ok(())
}

#[tokio::test]
async fn organizations_are_counted_separately() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = limiter(store, FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(1, 10, 0);
    let now = at(8, 0, 0);

    assert!(limiter.check_and_increment_at("org_a", &spec, now).await?.allowed);
    assert!(limiter.check_and_increment_at("org_b", &spec, now).await?.allowed);
    assert!(!limiter.check_and_increment_at("org_a", &spec, now).await?.allowed);
    Ok(())
}

#[tokio::test]
async fn fail_open_admits_in_degraded_mode() -> TestResult {
    let store = Arc::new(MemoryCounterStore::new());
    store.set_available(false);
    let limiter = limiter(Arc::clone(&store), FailurePolicy::FailOpen);
    let spec = RateLimitSpec::new(1, 1, 0);

    assert!(matches!(limiter.admit("org_1", &spec).await?, Admission::Degraded { .. }));
    assert!(matches!(limiter.admit("org_1", &spec).await?, Admission::Degraded { .. }));
    assert!(store.is_empty());

    store.set_available(true);
    assert!(matches!(limiter.admit("org_1", &spec).await?, Admission::Allowed(_)));
    assert!(matches!(limiter.admit("org_1", &spec).await?, Admission::Denied(_)));
    Ok(())
}

#[tokio::test]
async fn fail_closed_surfaces_the_error() {
    let store = Arc::new(MemoryCounterStore::new());
    store.set_available(false);
    let limiter = limiter(store, FailurePolicy::FailClosed);
    assert_eq!(limiter.policy(), FailurePolicy::FailClosed);

    let result = limiter.admit("org_1", &RateLimitSpec::new(1, 1, 0)).await;
    assert!(matches!(result, Err(RateLimitError::Unavailable(_))));
}

// Shared-store behaviour of the Lua script. These need a Redis server:
//   REDIS_URL=redis://127.0.0.1:6379 cargo test --test rate_limit -- --ignored

mod redis_store {
    use super::*;
    use redis::AsyncCommands;
    use tollgate_lib::ratelimit::{seconds_until_utc_midnight, CounterStoreError, RedisCounterStore};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    /// Unique tenant per test run so parallel runs never share counters
    fn fresh_org() -> String {
        format!("test_org_{}", uuid::Uuid::new_v4().simple())
    }

    async fn redis_limiter() -> Result<DistributedRateLimiter, CounterStoreError> {
        let store: Arc<dyn CounterStore> =
            Arc::new(RedisCounterStore::connect(&redis_url()).await?);
        // generous bound: a test failure should point at the script, not latency
        let config = RateLimitConfig { timeout_ms: 2000, ..RateLimitConfig::default() };
        Ok(DistributedRateLimiter::new(store, &config))
    }

    async fn raw_connection() -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        redis::Client::open(redis_url())?.get_multiplexed_async_connection().await
    }

    async fn cleanup(org: &str, now: DateTime<Utc>) -> TestResult {
        let mut conn = raw_connection().await?;
        let _: () = conn.del(&[daily_key(org, now), minute_key(org, now)]).await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore] // Requires Redis
    async fn concurrent_checks_never_overshoot_in_redis() -> TestResult {
        let limiter = Arc::new(redis_limiter().await?);
        let org = fresh_org();
        let spec = RateLimitSpec::new(10, 100, 5);
        let now = Utc::now();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let limiter = Arc::clone(&limiter);
            let org = org.clone();
            tasks.push(tokio::spawn(async move {
                limiter.check_and_increment_at(&org, &spec, now).await
            }));
        }
        let mut admitted = 0;
        for task in tasks {
            if task.await??.allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 15);

        let mut conn = raw_connection().await?;
        let minute: Option<u64> = conn.get(minute_key(&org, now)).await?;
        let daily: Option<u64> = conn.get(daily_key(&org, now)).await?;
        assert_eq!((minute, daily), (Some(15), Some(15)));
        cleanup(&org, now).await
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn daily_is_checked_before_minute_and_denials_do_not_count() -> TestResult {
        let limiter = redis_limiter().await?;
        let org = fresh_org();
        let spec = RateLimitSpec::new(3, 3, 0);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.check_and_increment_at(&org, &spec, now).await?.allowed);
        }
        for _ in 0..3 {
            let denied = limiter.check_and_increment_at(&org, &spec, now).await?;
            assert_eq!(denied.limit_type, Some(LimitType::Daily));
            assert_eq!((denied.daily_count, denied.minute_count), (3, 3));
        }

        let mut conn = raw_connection().await?;
        let minute: Option<u64> = conn.get(minute_key(&org, now)).await?;
        let daily: Option<u64> = conn.get(daily_key(&org, now)).await?;
        assert_eq!((minute, daily), (Some(3), Some(3)));
        cleanup(&org, now).await
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn minute_ceiling_denies_without_incrementing() -> TestResult {
        let limiter = redis_limiter().await?;
        let org = fresh_org();
        let spec = RateLimitSpec::new(2, 100, 1);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.check_and_increment_at(&org, &spec, now).await?.allowed);
        }
        let denied = limiter.check_and_increment_at(&org, &spec, now).await?;
        assert_eq!(denied.limit_type, Some(LimitType::Minute));
        assert_eq!(denied.daily_count, 3);

        let mut conn = raw_connection().await?;
        let daily: Option<u64> = conn.get(daily_key(&org, now)).await?;
        assert_eq!(daily, Some(3));
        cleanup(&org, now).await
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn counters_expire_with_their_windows() -> TestResult {
        let limiter = redis_limiter().await?;
        let minute_ttl = RateLimitConfig::default().minute_ttl_secs;
        let org = fresh_org();
        let spec = RateLimitSpec::new(10, 100, 0);
        let now = Utc::now();

        let decision = limiter.check_and_increment_at(&org, &spec, now).await?;
        assert!(decision.allowed);

        let mut conn = raw_connection().await?;
        let ttl: i64 = conn.ttl(minute_key(&org, now)).await?;
        assert!(ttl > 0 && ttl <= minute_ttl as i64, "minute ttl {ttl}");

        let until_midnight = seconds_until_utc_midnight(now) as i64;
        let ttl: i64 = conn.ttl(daily_key(&org, now)).await?;
        assert!(ttl > 0 && ttl <= until_midnight, "daily ttl {ttl}, midnight in {until_midnight}");
        assert!(decision.reset_daily as i64 <= until_midnight);

        // later writes keep the expiry set on creation
        limiter.check_and_increment_at(&org, &spec, now).await?;
        let ttl_after: i64 = conn.ttl(daily_key(&org, now)).await?;
        assert!(ttl_after <= ttl);
        cleanup(&org, now).await
    }
}
