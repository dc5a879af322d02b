use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing rule: successful and client-error responses are billed, gateway
/// and backend failures are not.
pub fn is_billable(status_code: u16) -> bool {
    (200..500).contains(&status_code)
}

/// One metered request, serialized as JSON for the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub request_id: String,
    pub organization_id: String,
    pub api_key_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub billable: bool,
}

impl UsageEvent {
    /// Build an event; `billable` is derived from the status code
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: impl Into<String>,
        organization_id: impl Into<String>,
        api_key_id: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
        response_time_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            organization_id: organization_id.into(),
            api_key_id: api_key_id.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            response_time_ms,
            timestamp,
            billable: is_billable(status_code),
        }
    }

    /// Events of one tenant share a key, so they land on one partition in order
    pub fn partition_key(&self) -> &str {
        &self.organization_id
    }
}
