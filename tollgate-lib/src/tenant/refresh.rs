use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{KeyMap, TenantCache};
use super::directory::{DirectoryError, TenantDirectory};
use super::entry::TenantKeyEntry;
use crate::config::CacheConfig;
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("tenant directory fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl RefreshError {
    /// Whether the next cycle may succeed without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            RefreshError::Directory(e) => e.is_transient(),
            RefreshError::Timeout(_) => true,
        }
    }
}

/// Where the refresh loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefreshState {
    Idle = 0,
    Fetching = 1,
    Swapping = 2,
    Stopped = 3,
}

impl RefreshState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RefreshState::Fetching,
            2 => RefreshState::Swapping,
            3 => RefreshState::Stopped,
            _ => RefreshState::Idle,
        }
    }
}

/// Outcome counters of the refresh loop.
///
/// `added`/`updated`/`removed`/`total` describe the last successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
    pub last_success: Option<DateTime<Utc>>,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u64,
}

/// Keeps the tenant cache in sync with the directory
pub struct RefreshManager {
    cache: Arc<TenantCache>,
    directory: Arc<dyn TenantDirectory>,
    entry_ttl: Duration,
    fetch_timeout: Duration,
    stats: ArcSwap<RefreshStats>,
    state: AtomicU8,
    metrics: Option<Arc<Metrics>>,
}

impl RefreshManager {
    pub fn new(
        cache: Arc<TenantCache>,
        directory: Arc<dyn TenantDirectory>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            cache,
            directory,
            entry_ttl: config.entry_ttl(),
            fetch_timeout: config.fetch_timeout(),
            stats: ArcSwap::from_pointee(RefreshStats::default()),
            state: AtomicU8::new(RefreshState::Idle as u8),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats::clone(&self.stats.load())
    }

    pub fn state(&self) -> RefreshState {
        RefreshState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RefreshState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run one fetch-and-swap cycle.
    ///
    /// On failure the live generation is left untouched.
    pub async fn refresh_once(&self) -> Result<RefreshStats, RefreshError> {
        self.set_state(RefreshState::Fetching);
        let fetch = self.directory.fetch_all_active_keys();
        let fetched = match timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return Err(self.record_failure(e.into())),
            Err(_) => return Err(self.record_failure(RefreshError::Timeout(self.fetch_timeout))),
        };

        self.set_state(RefreshState::Swapping);
        let previous = self.cache.snapshot();
        let mut added = 0;
        let mut updated = 0;
        let mut next = KeyMap::with_capacity(fetched.len());
        for (fingerprint, tenant) in fetched {
            match previous.get(&fingerprint) {
                None => added += 1,
                Some(old) if old.tenant != tenant => updated += 1,
                Some(_) => {}
            }
            let entry = TenantKeyEntry::new(fingerprint.clone(), tenant, self.entry_ttl);
            next.insert(fingerprint, Arc::new(entry));
        }
        let removed = previous.keys().filter(|fp| !next.contains_key(*fp)).count();
        let total = next.len();
        self.cache.replace_all(next);
        self.set_state(RefreshState::Idle);

        self.stats.rcu(|current| RefreshStats {
            added,
            updated,
            removed,
            total,
            last_success: Some(Utc::now()),
            successful_cycles: current.successful_cycles + 1,
            failed_cycles: current.failed_cycles,
            consecutive_failures: 0,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_refresh(values::REFRESH_OK, Some(total as u64));
        }
        info!(
            added,
            updated,
            removed,
            total,
            generation = self.cache.generation(),
            "tenant cache refreshed"
        );
        Ok(self.stats())
    }

    fn record_failure(&self, err: RefreshError) -> RefreshError {
        self.set_state(RefreshState::Idle);
        self.stats.rcu(|current| RefreshStats {
            failed_cycles: current.failed_cycles + 1,
            consecutive_failures: current.consecutive_failures + 1,
            ..RefreshStats::clone(current)
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_refresh(values::REFRESH_FAILED, None);
        }
        err
    }

    /// Spawn the periodic loop. The first cycle runs immediately.
    pub fn start(self, every: Duration) -> RefreshHandle {
        let manager = Arc::new(self);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_loop(Arc::clone(&manager), every, token.clone()));
        RefreshHandle { manager, token, task }
    }
}

async fn run_loop(manager: Arc<RefreshManager>, every: Duration, token: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "tenant cache refresh started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                // cancellation is only observed between cycles
                if let Err(e) = manager.refresh_once().await {
                    let stats = manager.stats();
                    if e.is_transient() {
                        warn!(
                            error = %e,
                            transient = true,
                            consecutive_failures = stats.consecutive_failures,
                            "tenant cache refresh failed, keeping previous generation"
                        );
                    } else {
                        error!(
                            error = %e,
                            transient = false,
                            consecutive_failures = stats.consecutive_failures,
                            "tenant directory needs attention, keeping previous generation"
                        );
                    }
                }
            }
        }
    }

    manager.set_state(RefreshState::Stopped);
    debug!("tenant cache refresh loop exited");
}

/// Owner of a running refresh loop
pub struct RefreshHandle {
    manager: Arc<RefreshManager>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn stats(&self) -> RefreshStats {
        self.manager.stats()
    }

    pub fn state(&self) -> RefreshState {
        self.manager.state()
    }

    /// Whether at least one cycle has completed successfully
    pub fn is_warm(&self) -> bool {
        self.manager.stats.load().successful_cycles > 0
    }

    /// Signal stop and wait up to `grace` for the in-flight cycle
    pub async fn shutdown(self, grace: Duration) {
        self.token.cancel();
        let abort = self.task.abort_handle();
        match timeout(grace, self.task).await {
            Ok(Ok(())) => info!("tenant cache refresh stopped"),
            Ok(Err(e)) => warn!(error = %e, "tenant cache refresh task ended abnormally"),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "tenant cache refresh did not stop in time, aborting"
                );
                abort.abort();
                self.manager.set_state(RefreshState::Stopped);
            }
        }
    }
}
