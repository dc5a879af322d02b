use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

use super::entry::{Fingerprint, RateLimitSpec, TenantRecord};

/// Every active key known to the directory
pub type DirectorySnapshot = AHashMap<Fingerprint, TenantRecord>;

/// Errors reported by a tenant directory
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Worth retrying: store unreachable, timed out, file being rewritten
    #[error("tenant directory unavailable: {0}")]
    Transient(String),
    /// Retrying will not help without operator action (corrupt data, bad config)
    #[error("tenant directory error: {0}")]
    Permanent(String),
}

impl DirectoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::Transient(_))
    }
}

/// Backing store of API keys (the system of record the cache shields)
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Complete set of currently active keys
    async fn fetch_all_active_keys(&self) -> Result<DirectorySnapshot, DirectoryError>;

    /// Single key; `Ok(None)` when unknown, revoked or expired
    async fn fetch_one_key(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TenantRecord>, DirectoryError>;
}

/// Directory held in process memory.
///
/// Used when keys are provisioned programmatically and by tests, which can
/// switch it to unavailable to simulate a store outage.
#[derive(Default)]
pub struct MemoryDirectory {
    keys: RwLock<DirectorySnapshot>,
    unavailable: AtomicBool,
    fetch_all_calls: AtomicUsize,
    fetch_one_calls: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = (Fingerprint, TenantRecord)>,
    {
        let directory = Self::new();
        if let Ok(mut map) = directory.keys.write() {
            map.extend(keys);
        }
        directory
    }

    pub fn insert(&self, fingerprint: Fingerprint, record: TenantRecord) {
        if let Ok(mut map) = self.keys.write() {
            map.insert(fingerprint, record);
        }
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<TenantRecord> {
        self.keys.write().ok().and_then(|mut map| map.remove(fingerprint))
    }

    /// Make every call fail with a transient error until switched back
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    pub fn fetch_all_calls(&self) -> usize {
        self.fetch_all_calls.load(Ordering::Acquire)
    }

    pub fn fetch_one_calls(&self) -> usize {
        self.fetch_one_calls.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(DirectoryError::Transient("memory directory marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for MemoryDirectory {
    async fn fetch_all_active_keys(&self) -> Result<DirectorySnapshot, DirectoryError> {
        self.fetch_all_calls.fetch_add(1, Ordering::AcqRel);
        self.check_available()?;
        self.keys
            .read()
            .map(|map| map.clone())
            .map_err(|_| DirectoryError::Permanent("memory directory lock poisoned".into()))
    }

    async fn fetch_one_key(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TenantRecord>, DirectoryError> {
        self.fetch_one_calls.fetch_add(1, Ordering::AcqRel);
        self.check_available()?;
        self.keys
            .read()
            .map(|map| map.get(fingerprint).cloned())
            .map_err(|_| DirectoryError::Permanent("memory directory lock poisoned".into()))
    }
}

/// One `[[keys]]` table of a key file
#[derive(Debug, Deserialize)]
struct KeyFileEntry {
    fingerprint: String,
    api_key_id: String,
    organization_id: String,
    requests_per_minute: u64,
    requests_per_day: u64,
    #[serde(default)]
    burst_allowance: u64,
    #[serde(default)]
    revoked: bool,
    /// Account-level expiry, unrelated to the local cache TTL
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl KeyFileEntry {
    fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|at| at > now)
    }

    fn into_record(self) -> (Fingerprint, TenantRecord) {
        (
            Fingerprint::from_hex(&self.fingerprint),
            TenantRecord {
                organization_id: self.organization_id,
                api_key_id: self.api_key_id,
                rate_limit: RateLimitSpec::new(
                    self.requests_per_minute,
                    self.requests_per_day,
                    self.burst_allowance,
                ),
            },
        )
    }
}

#[derive(Debug, Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: Vec<KeyFileEntry>,
}

/// Directory backed by a TOML key file, re-read on every fetch.
///
/// ```toml
/// [[keys]]
/// fingerprint = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// api_key_id = "key_01"
/// organization_id = "org_1"
/// requests_per_minute = 1000
/// requests_per_day = 100000
/// burst_allowance = 500
/// ```
pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_active(&self) -> Result<DirectorySnapshot, DirectoryError> {
        let txt = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DirectoryError::Transient(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let file: KeyFile = toml::from_str(&txt).map_err(|e| {
            DirectoryError::Permanent(format!("failed to parse {}: {e}", self.path.display()))
        })?;

        let now = Utc::now();
        let total = file.keys.len();
        let active: DirectorySnapshot = file
            .keys
            .into_iter()
            .filter(|entry| entry.is_active_at(now))
            .map(KeyFileEntry::into_record)
            .collect();
        debug!(path = %self.path.display(), total, active = active.len(), "key file loaded");
        Ok(active)
    }
}

#[async_trait]
impl TenantDirectory for FileDirectory {
    async fn fetch_all_active_keys(&self) -> Result<DirectorySnapshot, DirectoryError> {
        self.read_active().await
    }

    async fn fetch_one_key(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TenantRecord>, DirectoryError> {
        Ok(self.read_active().await?.remove(fingerprint))
    }
}
