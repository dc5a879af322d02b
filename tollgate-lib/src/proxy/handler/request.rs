use chrono::Utc;
use http::header::HeaderValue;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::proxy::context::GatewayState;
use crate::proxy::forwarding::{forward, resolve_service};
use crate::proxy::handler::admission::check_rate_limit;
use crate::proxy::handler::headers::{
    add_forwarded_headers, inject_tenant_headers, names, strip_credentials,
};
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::proxy::synthetic_response::{insert_rate_limit_headers, synthetic_error_response};
use crate::tenant::{extract_credential, TenantKeyEntry};
use crate::usage::UsageEvent;

type RespBody = BoxBody<bytes::Bytes, hyper::Error>;

/// Label used for requests that never matched a service
const NO_SERVICE: &str = "-";

/// Run one request through the admission pipeline:
/// authenticate, resolve the service, apply the rate limit, forward, then
/// record the usage event. Every failure becomes a JSON error response.
pub async fn handle_gateway_request(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
    peer: SocketAddr,
) -> Response<RespBody> {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().to_string();

    let (service, result) = admit_and_forward(req, &state, peer, &request_id, start).await;
    let mut response = match result {
        Ok(response) => response,
        Err(e) => {
            debug!(request_id = %request_id, code = e.code(), error = %e, "request rejected");
            if let Some(m) = &state.metrics {
                m.record_error(e.code());
            }
            synthetic_error_response(&e)
        }
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(names::REQUEST_ID, value);
    }

    if let Some(m) = &state.metrics {
        m.record_request(
            &method,
            response.status().as_u16(),
            service.as_deref().unwrap_or(NO_SERVICE),
            start.elapsed().as_secs_f64(),
        );
    }
    response
}

/// Returns the matched service name (for metrics) with the outcome
async fn admit_and_forward(
    mut req: Request<Incoming>,
    state: &GatewayState,
    peer: SocketAddr,
    request_id: &str,
    start: Instant,
) -> (Option<String>, HttpResult<Response<RespBody>>) {
    let credential = extract_credential(req.headers()).map(str::to_owned);
    let entry = match state.authenticator.authenticate_request(credential.as_deref()).await {
        Ok(entry) => entry,
        Err(e) => return (None, Err(e.into())),
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let Some(matched) = resolve_service(&path_and_query, &state.services) else {
        let path = req.uri().path().to_string();
        return (None, Err(HttpError::UnknownService(path)));
    };
    let service = matched.service.name.clone();
    let target = match matched.upstream_uri() {
        Ok(target) => target,
        Err(e) => return (Some(service), Err(e)),
    };

    let decision = match check_rate_limit(&state.limiter, &entry.tenant).await {
        Ok(decision) => decision,
        Err(e) => return (Some(service), Err(e)),
    };

    let endpoint = req.uri().path().to_string();
    let method = req.method().to_string();
    strip_credentials(req.headers_mut());
    inject_tenant_headers(req.headers_mut(), &entry.tenant, request_id);
    add_forwarded_headers(req.headers_mut(), peer);

    let result = forward(
        req,
        target,
        &service,
        state.client_pool.client(),
        state.request_timeout,
        state.metrics.as_ref(),
    )
    .await;

    // backend failures are metered too, as non-billable events
    let metered_status = match &result {
        Ok(response) => Some(response.status().as_u16()),
        Err(e) if e.is_backend_failure() => Some(e.status().as_u16()),
        Err(_) => None,
    };
    if let Some(status_code) = metered_status {
        let event = UsageEvent::new(
            request_id,
            entry.tenant.organization_id.as_str(),
            entry.tenant.api_key_id.as_str(),
            endpoint,
            method,
            status_code,
            start.elapsed().as_millis() as u64,
            Utc::now(),
        );
        record_usage(state, &entry, event);
    }

    let result = result.map(|mut response| {
        if let Some(decision) = &decision {
            insert_rate_limit_headers(response.headers_mut(), decision);
        }
        response
    });
    (Some(service), result)
}

fn record_usage(state: &GatewayState, entry: &TenantKeyEntry, event: UsageEvent) {
    let request_id = event.request_id.clone();
    if !state.emitter.record(event) {
        warn!(
            request_id = %request_id,
            fingerprint = entry.fingerprint.short(),
            "usage event not recorded"
        );
    }
}
