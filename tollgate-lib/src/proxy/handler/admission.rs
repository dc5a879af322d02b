use tracing::debug;

use crate::proxy::http_result::{HttpError, HttpResult};
use crate::ratelimit::{Admission, DistributedRateLimiter, RateLimitDecision};
use crate::tenant::TenantRecord;

/// Run the rate limiter for an authenticated tenant.
///
/// Returns:
/// - `Ok(Some(decision))` if the request was counted and may proceed
/// - `Ok(None)` if the store failed and the fail-open policy admitted it
/// - `Err(RateLimitExceeded)` if a window is exhausted
/// - `Err(RateLimiterUnavailable)` if the store failed under fail-closed
pub async fn check_rate_limit(
    limiter: &DistributedRateLimiter,
    tenant: &TenantRecord,
) -> HttpResult<Option<RateLimitDecision>> {
    match limiter.admit(&tenant.organization_id, &tenant.rate_limit).await {
        Ok(Admission::Allowed(decision)) => {
            debug!(
                organization_id = %tenant.organization_id,
                minute_remaining = decision.minute_remaining,
                daily_remaining = decision.daily_remaining,
                "Rate limit check passed"
            );
            Ok(Some(decision))
        }
        Ok(Admission::Denied(decision)) => {
            debug!(
                organization_id = %tenant.organization_id,
                limit_type = decision.limit_type.map(|t| t.as_str()),
                "Rate limit exceeded"
            );
            Err(HttpError::RateLimitExceeded(decision))
        }
        Ok(Admission::Degraded { .. }) => Ok(None),
        Err(e) => Err(HttpError::RateLimiterUnavailable(e.to_string())),
    }
}
