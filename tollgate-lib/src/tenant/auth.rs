use http::header::AUTHORIZATION;
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::cache::{CacheLookup, TenantCache};
use super::directory::TenantDirectory;
use super::entry::{Fingerprint, TenantKeyEntry};
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

/// Header carrying the bare key when `Authorization` is not used
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no API key provided")]
    Missing,
    #[error("invalid API key")]
    Invalid,
    #[error("authentication temporarily unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Missing => "auth_missing",
            AuthError::Invalid => "auth_invalid",
            AuthError::Unavailable(_) => "auth_unavailable",
        }
    }
}

/// Read the credential from `Authorization: Bearer <key>` or `X-API-Key: <key>`
pub fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        let token = value
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            return Some(token);
        }
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves a credential to its tenant, cache first
pub struct Authenticator {
    cache: Arc<TenantCache>,
    directory: Arc<dyn TenantDirectory>,
    entry_ttl: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl Authenticator {
    pub fn new(
        cache: Arc<TenantCache>,
        directory: Arc<dyn TenantDirectory>,
        entry_ttl: Duration,
    ) -> Self {
        Self { cache, directory, entry_ttl, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Authenticate the credential of a request (`None` when it carried none)
    pub async fn authenticate_request(
        &self,
        credential: Option<&str>,
    ) -> Result<Arc<TenantKeyEntry>, AuthError> {
        match credential {
            Some(credential) => self.authenticate(credential).await,
            None => Err(self.fail(AuthError::Missing)),
        }
    }

    /// Fingerprint the credential and resolve it.
    ///
    /// A cache hit never touches the directory. A miss or an expired entry
    /// costs exactly one `fetch_one_key`; a found key is written back with a
    /// fresh TTL. When the directory is down an expired entry is still
    /// served, `Unavailable` only surfaces on a true miss.
    pub async fn authenticate(&self, credential: &str) -> Result<Arc<TenantKeyEntry>, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(self.fail(AuthError::Missing));
        }
        let fingerprint = Fingerprint::of(credential);

        let stale = match self.cache.lookup(&fingerprint) {
            CacheLookup::Hit(entry) => {
                self.record_lookup(values::CACHE_HIT);
                return Ok(entry);
            }
            CacheLookup::Expired(entry) => {
                self.record_lookup(values::CACHE_EXPIRED);
                Some(entry)
            }
            CacheLookup::Miss => {
                self.record_lookup(values::CACHE_MISS);
                None
            }
        };

        match self.directory.fetch_one_key(&fingerprint).await {
            Ok(Some(tenant)) => {
                debug!(
                    fingerprint = fingerprint.short(),
                    organization_id = %tenant.organization_id,
                    "tenant resolved from directory"
                );
                let entry = Arc::new(TenantKeyEntry::new(fingerprint, tenant, self.entry_ttl));
                self.cache.upsert_one(Arc::clone(&entry));
                Ok(entry)
            }
            Ok(None) => Err(self.fail(AuthError::Invalid)),
            Err(e) => match stale {
                Some(entry) => {
                    warn!(
                        fingerprint = fingerprint.short(),
                        error = %e,
                        transient = e.is_transient(),
                        "tenant directory lookup failed, serving expired cache entry"
                    );
                    Ok(entry)
                }
                None => {
                    warn!(
                        fingerprint = fingerprint.short(),
                        error = %e,
                        transient = e.is_transient(),
                        "tenant directory lookup failed"
                    );
                    Err(self.fail(AuthError::Unavailable(e.to_string())))
                }
            },
        }
    }

    fn record_lookup(&self, result: &'static str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(result);
        }
    }

    fn fail(&self, err: AuthError) -> AuthError {
        if let Some(metrics) = &self.metrics {
            metrics.record_auth_failure(err.code());
        }
        err
    }
}
