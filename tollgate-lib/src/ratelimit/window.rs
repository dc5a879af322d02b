use chrono::{DateTime, Timelike, Utc};

const SECONDS_PER_DAY: u64 = 86_400;
const SECONDS_PER_MINUTE: u64 = 60;

/// Daily counter key: `ratelimit:{org}:daily:YYYYMMDD`.
///
/// `{org}` is a Redis Cluster hash tag, so both keys of one tenant map to the
/// same slot and the script can touch them atomically.
pub fn daily_key(organization_id: &str, now: DateTime<Utc>) -> String {
    format!("ratelimit:{{{organization_id}}}:daily:{}", now.format("%Y%m%d"))
}

/// Minute counter key: `ratelimit:{org}:minute:<unix minute>`
pub fn minute_key(organization_id: &str, now: DateTime<Utc>) -> String {
    format!("ratelimit:{{{organization_id}}}:minute:{}", epoch_minute(now))
}

pub fn epoch_minute(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(SECONDS_PER_MINUTE as i64)
}

/// Seconds until the next UTC midnight, at least 1
pub fn seconds_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    let elapsed = u64::from(now.num_seconds_from_midnight());
    SECONDS_PER_DAY.saturating_sub(elapsed).max(1)
}

/// Seconds until the current minute window rolls over, at least 1
pub fn seconds_until_next_minute(now: DateTime<Utc>) -> u64 {
    let elapsed = u64::from(now.second());
    SECONDS_PER_MINUTE.saturating_sub(elapsed).max(1)
}
