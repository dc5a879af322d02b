use http::StatusCode;
use thiserror::Error;

use crate::ratelimit::RateLimitDecision;
use crate::tenant::AuthError;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// Everything the request path can answer on behalf of a backend
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("No API key provided")]
    AuthMissing,

    #[error("Invalid API key")]
    AuthInvalid,

    #[error("Authentication temporarily unavailable")]
    AuthUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded(RateLimitDecision),

    #[error("Rate limiter unavailable")]
    RateLimiterUnavailable(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Failed to generate upstream request for backend: {0}")]
    FailedToGenerateUpstreamRequest(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend did not respond in time")]
    BackendTimeout,
}

impl HttpError {
    /// Stable machine-readable code put in the JSON error body
    pub fn code(&self) -> &'static str {
        match self {
            HttpError::AuthMissing => "auth_missing",
            HttpError::AuthInvalid => "auth_invalid",
            HttpError::AuthUnavailable(_) => "auth_unavailable",
            HttpError::RateLimitExceeded(_) => "rate_limit_exceeded",
            HttpError::RateLimiterUnavailable(_) => "rate_limiter_unavailable",
            HttpError::UnknownService(_) => "unknown_service",
            HttpError::FailedToGenerateUpstreamRequest(_) => "bad_request",
            HttpError::BackendUnavailable(_) => "backend_unavailable",
            HttpError::BackendTimeout => "backend_timeout",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::AuthMissing | HttpError::AuthInvalid => StatusCode::UNAUTHORIZED,
            HttpError::AuthUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            HttpError::RateLimiterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::UnknownService(_) => StatusCode::NOT_FOUND,
            HttpError::FailedToGenerateUpstreamRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            HttpError::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether the request reached (or tried to reach) a backend, which
    /// makes it a metered request
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, HttpError::BackendUnavailable(_) | HttpError::BackendTimeout)
    }
}

impl From<AuthError> for HttpError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Missing => HttpError::AuthMissing,
            AuthError::Invalid => HttpError::AuthInvalid,
            AuthError::Unavailable(reason) => HttpError::AuthUnavailable(reason),
        }
    }
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        e.status()
    }
}
