use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::store::{CounterOutcome, CounterRequest, CounterStore, CounterStoreError};
use super::window::{
    daily_key, minute_key, seconds_until_next_minute, seconds_until_utc_midnight,
};
use crate::config::{FailurePolicy, RateLimitConfig};
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;
use crate::tenant::RateLimitSpec;

/// Which window refused the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Daily,
    Minute,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Daily => "daily",
            LimitType::Minute => "minute",
        }
    }
}

/// Outcome of one check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Set only when denied
    pub limit_type: Option<LimitType>,
    pub daily_count: u64,
    pub minute_count: u64,
    pub daily_limit: u64,
    /// Requests per minute plus burst
    pub minute_limit: u64,
    pub daily_remaining: u64,
    pub minute_remaining: u64,
    /// Seconds until the daily window resets
    pub reset_daily: u64,
    /// Seconds until the minute window resets
    pub reset_minute: u64,
}

impl RateLimitDecision {
    /// Seconds a refused client should wait before retrying
    pub fn retry_after(&self) -> u64 {
        match self.limit_type {
            Some(LimitType::Daily) => self.reset_daily,
            Some(LimitType::Minute) => self.reset_minute,
            None => 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limiter unavailable: {0}")]
    Unavailable(#[from] CounterStoreError),
    #[error("rate limiter did not answer within {0:?}")]
    Timeout(Duration),
}

/// Result of applying the failure policy to a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed(RateLimitDecision),
    Denied(RateLimitDecision),
    /// The store failed and the fail-open policy let the request through
    Degraded { reason: String },
}

/// Dual-window (minute + day) limiter over a shared counter store
pub struct DistributedRateLimiter {
    store: Arc<dyn CounterStore>,
    policy: FailurePolicy,
    timeout: Duration,
    minute_ttl_secs: u64,
    metrics: Option<Arc<Metrics>>,
}

impl DistributedRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            policy: config.failure_policy,
            timeout: config.timeout(),
            minute_ttl_secs: config.minute_ttl_secs,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn check_and_increment(
        &self,
        organization_id: &str,
        spec: &RateLimitSpec,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.check_and_increment_at(organization_id, spec, Utc::now()).await
    }

    /// Check both windows at `now` and count the request if it fits.
    ///
    /// The daily quota is checked first, so a request refused for the day is
    /// reported as `daily` even when the minute window is also full. Burst
    /// only raises the minute ceiling.
    pub async fn check_and_increment_at(
        &self,
        organization_id: &str,
        spec: &RateLimitSpec,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let request = CounterRequest {
            daily_key: daily_key(organization_id, now),
            minute_key: minute_key(organization_id, now),
            daily_limit: spec.requests_per_day,
            minute_limit: spec.minute_ceiling(),
            daily_ttl_secs: seconds_until_utc_midnight(now),
            minute_ttl_secs: self.minute_ttl_secs,
        };

        let started = Instant::now();
        let result = timeout(self.timeout, self.store.check_and_increment(&request)).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit_duration(started.elapsed().as_secs_f64());
        }
        let reply = match result {
            Ok(reply) => reply?,
            Err(_) => return Err(RateLimitError::Timeout(self.timeout)),
        };

        let limit_type = match reply.outcome {
            CounterOutcome::Incremented => None,
            CounterOutcome::DailyExceeded => Some(LimitType::Daily),
            CounterOutcome::MinuteExceeded => Some(LimitType::Minute),
        };
        let decision = RateLimitDecision {
            allowed: limit_type.is_none(),
            limit_type,
            daily_count: reply.daily_count,
            minute_count: reply.minute_count,
            daily_limit: request.daily_limit,
            minute_limit: request.minute_limit,
            daily_remaining: request.daily_limit.saturating_sub(reply.daily_count),
            minute_remaining: request.minute_limit.saturating_sub(reply.minute_count),
            reset_daily: reply
                .daily_ttl_secs
                .filter(|ttl| *ttl > 0)
                .unwrap_or(request.daily_ttl_secs),
            reset_minute: seconds_until_next_minute(now),
        };
        debug!(
            organization_id,
            allowed = decision.allowed,
            daily = decision.daily_count,
            minute = decision.minute_count,
            "rate limit checked"
        );
        Ok(decision)
    }

    /// Check and apply the configured failure policy.
    ///
    /// Fail-open turns a store error into `Degraded`; fail-closed returns it.
    pub async fn admit(
        &self,
        organization_id: &str,
        spec: &RateLimitSpec,
    ) -> Result<Admission, RateLimitError> {
        match self.check_and_increment(organization_id, spec).await {
            Ok(decision) if decision.allowed => {
                self.record(values::RATE_ALLOWED, None);
                Ok(Admission::Allowed(decision))
            }
            Ok(decision) => {
                self.record(values::RATE_DENIED, decision.limit_type.map(|t| t.as_str()));
                Ok(Admission::Denied(decision))
            }
            Err(e) => match self.policy {
                FailurePolicy::FailOpen => {
                    warn!(
                        organization_id,
                        error = %e,
                        "rate limiter unavailable, admitting in degraded mode"
                    );
                    self.record(values::RATE_DEGRADED, None);
                    Ok(Admission::Degraded { reason: e.to_string() })
                }
                FailurePolicy::FailClosed => {
                    warn!(organization_id, error = %e, "rate limiter unavailable, rejecting");
                    self.record(values::RATE_UNAVAILABLE, None);
                    Err(e)
                }
            },
        }
    }

    fn record(&self, result: &'static str, limit_type: Option<&'static str>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(result, limit_type);
        }
    }
}
