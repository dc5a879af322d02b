use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Tenant cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Interval between full reloads of active keys, in seconds
    /// The first reload runs immediately at startup
    /// Default: 900 (15 minutes)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Local TTL given to each cached entry, in seconds
    /// Should exceed the refresh interval so a healthy refresh loop never lets entries lapse
    /// Default: 1800 (30 minutes)
    #[serde(default = "default_entry_ttl")]
    pub entry_ttl_secs: u64,
    /// Upper bound for one full fetch from the tenant directory, in milliseconds
    /// Default: 30000
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            entry_ttl_secs: default_entry_ttl(),
            fetch_timeout_ms: default_fetch_timeout(),
        }
    }
}

/// Tenant directory (backing store of API keys)
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectoryConfig {
    /// TOML key file, re-read on every fetch
    File { path: PathBuf },
    /// No keys at all; every credential is rejected until keys are injected programmatically
    #[default]
    Memory,
}

/// Behavior when the shared counter store cannot be reached
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request and log a degraded-mode warning
    #[default]
    FailOpen,
    /// Deny the request with 503 rate_limiter_unavailable
    FailClosed,
}

/// Where rate-limit counters live
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CounterStoreConfig {
    /// Shared Redis; required when more than one gateway instance runs
    Redis { url: String },
    /// Process-local counters (single instance only)
    #[default]
    Memory,
}

/// Distributed rate limiter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Counter store backend
    /// Default: memory
    #[serde(default)]
    pub store: CounterStoreConfig,
    /// Single source of truth for store outages
    /// Options: "fail_open", "fail_closed"
    /// Default: "fail_open"
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Bound on one check-and-increment round-trip, in milliseconds
    /// Exceeding it counts as the store being unavailable
    /// Default: 100
    #[serde(default = "default_rate_limit_timeout")]
    pub timeout_ms: u64,
    /// TTL of a per-minute counter once created, in seconds
    /// Longer than the window to absorb clock skew across instances
    /// Default: 120
    #[serde(default = "default_minute_ttl")]
    pub minute_ttl_secs: u64,
}

impl RateLimitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            store: CounterStoreConfig::default(),
            failure_policy: FailurePolicy::default(),
            timeout_ms: default_rate_limit_timeout(),
            minute_ttl_secs: default_minute_ttl(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    900
}

fn default_entry_ttl() -> u64 {
    1800
}

fn default_fetch_timeout() -> u64 {
    30000
}

fn default_rate_limit_timeout() -> u64 {
    100
}

fn default_minute_ttl() -> u64 {
    120
}
