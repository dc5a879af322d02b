use http::header::{HeaderValue, AUTHORIZATION, HOST};
use http::HeaderMap;
use std::net::SocketAddr;

use crate::tenant::{TenantRecord, API_KEY_HEADER};

/// Identity headers the gateway adds for backends
pub mod names {
    /// Organization that owns the calling key
    pub const ORGANIZATION_ID: &str = "x-organization-id";
    /// Identifier of the calling key (never the key itself)
    pub const API_KEY_ID: &str = "x-api-key-id";
    /// Request id, also carried by the usage event
    pub const REQUEST_ID: &str = "x-request-id";
}

pub mod forwarded {
    pub const FOR: &str = "x-forwarded-for";
    pub const HOST: &str = "x-forwarded-host";
    pub const PROTO: &str = "x-forwarded-proto";
}

/// Add X-Forwarded-* headers
///
/// Appends the client IP to X-Forwarded-For (or creates it), copies Host into
/// X-Forwarded-Host and sets X-Forwarded-Proto to "http".
pub fn add_forwarded_headers(headers: &mut HeaderMap, peer: SocketAddr) {
    let client_ip = peer.ip().to_string();
    let new_for = match headers.get(forwarded::FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&new_for) {
        headers.insert(forwarded::FOR, value);
    }

    if let Some(host) = headers.get(HOST).cloned() {
        headers.insert(forwarded::HOST, host);
    }

    headers.insert(forwarded::PROTO, HeaderValue::from_static("http"));
}

/// Remove the caller's credential so it never reaches a backend
pub fn strip_credentials(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);
    headers.remove(API_KEY_HEADER);
}

/// Tell the backend who is calling, overwriting anything the client sent
pub fn inject_tenant_headers(headers: &mut HeaderMap, tenant: &TenantRecord, request_id: &str) {
    for (name, value) in [
        (names::ORGANIZATION_ID, tenant.organization_id.as_str()),
        (names::API_KEY_ID, tenant.api_key_id.as_str()),
        (names::REQUEST_ID, request_id),
    ] {
        headers.remove(name);
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
}
