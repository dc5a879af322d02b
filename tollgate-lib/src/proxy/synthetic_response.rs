use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use serde_json::{json, Value};

use crate::proxy::http_result::HttpError;
use crate::ratelimit::RateLimitDecision;

type RespBody = BoxBody<Bytes, hyper::Error>;

pub const X_RATELIMIT_LIMIT_MINUTE: &str = "x-ratelimit-limit-minute";
pub const X_RATELIMIT_REMAINING_MINUTE: &str = "x-ratelimit-remaining-minute";
pub const X_RATELIMIT_LIMIT_DAY: &str = "x-ratelimit-limit-day";
pub const X_RATELIMIT_REMAINING_DAY: &str = "x-ratelimit-remaining-day";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// JSON error response: `{"error": {"code", "message"}}`, plus the quota
/// details and rate-limit headers for a 429
pub(crate) fn synthetic_error_response(error: &HttpError) -> Response<RespBody> {
    let mut body = json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        }
    });
    if let HttpError::RateLimitExceeded(decision) = error {
        body["error"]["limit_type"] = json!(decision.limit_type);
        body["error"]["daily_count"] = json!(decision.daily_count);
        body["error"]["minute_count"] = json!(decision.minute_count);
        body["error"]["retry_after_secs"] = json!(decision.retry_after());
    }

    let mut resp = Response::new(json_body(&body));
    *resp.status_mut() = error.status();
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let HttpError::RateLimitExceeded(decision) = error {
        resp.headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(decision.retry_after()));
        insert_rate_limit_headers(resp.headers_mut(), decision);
    }
    resp
}

/// Quota headers, on denied and admitted responses alike
pub(crate) fn insert_rate_limit_headers(
    headers: &mut http::HeaderMap,
    decision: &RateLimitDecision,
) {
    insert_number(headers, X_RATELIMIT_LIMIT_MINUTE, decision.minute_limit);
    insert_number(headers, X_RATELIMIT_REMAINING_MINUTE, decision.minute_remaining);
    insert_number(headers, X_RATELIMIT_LIMIT_DAY, decision.daily_limit);
    insert_number(headers, X_RATELIMIT_REMAINING_DAY, decision.daily_remaining);
    let reset = if decision.allowed { decision.reset_minute } else { decision.retry_after() };
    insert_number(headers, X_RATELIMIT_RESET, reset);
}

fn insert_number(headers: &mut http::HeaderMap, name: &'static str, value: u64) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
}

fn json_body(body: &Value) -> RespBody {
    Full::new(Bytes::from(body.to_string()))
        .map_err(|never| match never {})
        .boxed()
}
