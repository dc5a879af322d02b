use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One-way identifier of a credential (lowercase SHA-256 hex).
///
/// The plaintext key never leaves the request path; everything stored or
/// logged uses the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a plaintext credential
    pub fn of(credential: &str) -> Self {
        Self(hex::encode(Sha256::digest(credential.as_bytes())))
    }

    /// Wrap an already computed hex digest (as stored by the key directory)
    pub fn from_hex(digest: &str) -> Self {
        Self(digest.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to put in log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Effective quota of a tenant key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub requests_per_minute: u64,
    pub requests_per_day: u64,
    /// Extra requests allowed on top of `requests_per_minute`; never extends the daily quota
    pub burst_allowance: u64,
}

impl RateLimitSpec {
    pub fn new(requests_per_minute: u64, requests_per_day: u64, burst_allowance: u64) -> Self {
        Self { requests_per_minute, requests_per_day, burst_allowance }
    }

    /// Hard per-minute ceiling: steady rate plus burst
    pub fn minute_ceiling(&self) -> u64 {
        self.requests_per_minute.saturating_add(self.burst_allowance)
    }
}

/// What the tenant directory knows about one active key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub organization_id: String,
    pub api_key_id: String,
    pub rate_limit: RateLimitSpec,
}

/// Cached view of one credential, valid until `expires_at`
#[derive(Debug, Clone)]
pub struct TenantKeyEntry {
    pub fingerprint: Fingerprint,
    pub tenant: TenantRecord,
    pub expires_at: Instant,
}

impl TenantKeyEntry {
    pub fn new(fingerprint: Fingerprint, tenant: TenantRecord, ttl: Duration) -> Self {
        Self { fingerprint, tenant, expires_at: Instant::now() + ttl }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
