use ahash::AHashMap;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use super::entry::{Fingerprint, TenantKeyEntry};

/// One generation of the cache contents
pub type KeyMap = AHashMap<Fingerprint, Arc<TenantKeyEntry>>;

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<TenantKeyEntry>),
    /// Present but past its TTL; callers treat it as a miss
    Expired(Arc<TenantKeyEntry>),
    Miss,
}

impl CacheLookup {
    /// The entry, only if it is still fresh
    pub fn fresh(self) -> Option<Arc<TenantKeyEntry>> {
        match self {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Expired(_) | CacheLookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// In-memory `fingerprint → entry` map shared by every request task.
///
/// Readers load the current generation through a single atomic pointer and
/// never take a lock. `replace_all` publishes a whole new generation;
/// `upsert_one` publishes a copy of the current one with a single entry changed.
pub struct TenantCache {
    current: ArcSwap<KeyMap>,
    generation: AtomicU64,
}

impl TenantCache {
    pub fn new() -> Self {
        Self { current: ArcSwap::from_pointee(KeyMap::new()), generation: AtomicU64::new(0) }
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> CacheLookup {
        self.lookup_at(fingerprint, Instant::now())
    }

    /// Lookup against an explicit clock reading
    pub fn lookup_at(&self, fingerprint: &Fingerprint, now: Instant) -> CacheLookup {
        match self.current.load().get(fingerprint) {
            Some(entry) if entry.is_expired_at(now) => CacheLookup::Expired(Arc::clone(entry)),
            Some(entry) => CacheLookup::Hit(Arc::clone(entry)),
            None => CacheLookup::Miss,
        }
    }

    /// Swap in a complete new generation and return the previous one.
    /// Expired entries of the old generation disappear here.
    pub fn replace_all(&self, entries: KeyMap) -> Arc<KeyMap> {
        let previous = self.current.swap(Arc::new(entries));
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous
    }

    /// Insert or overwrite one entry, leaving every other entry untouched.
    ///
    /// Copies the current generation, so it is meant for the rare fallback
    /// path, not for bulk loading.
    pub fn upsert_one(&self, entry: Arc<TenantKeyEntry>) {
        self.current.rcu(|map| {
            let mut next = KeyMap::clone(map);
            next.insert(entry.fingerprint.clone(), Arc::clone(&entry));
            next
        });
    }

    /// Current generation, for inspection and diffing
    pub fn snapshot(&self) -> Arc<KeyMap> {
        self.current.load_full()
    }

    /// Number of completed `replace_all` swaps
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl Default for TenantCache {
    fn default() -> Self {
        Self::new()
    }
}
