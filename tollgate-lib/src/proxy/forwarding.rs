use crate::config::Service;
use crate::proxy::client_pool::HttpClient;
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::telemetry::Metrics;
use http::{Request, Response, Uri};
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::Incoming;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type RespBody = BoxBody<bytes::Bytes, hyper::Error>;

/// Service addressed by a request and the path to send it
#[derive(Debug, Clone)]
pub struct ServiceMatch<'a> {
    pub service: &'a Service,
    /// Path and query as the backend should see them
    pub upstream_path: String,
}

impl ServiceMatch<'_> {
    /// Absolute backend URI: service base URL followed by the upstream path
    pub fn upstream_uri(&self) -> HttpResult<Uri> {
        format!("{}{}", self.service.url.trim_end_matches('/'), self.upstream_path)
            .parse::<Uri>()
            .map_err(|e| HttpError::FailedToGenerateUpstreamRequest(e.to_string()))
    }
}

/// Pick the service named by the first path segment.
///
/// `/billing/invoices?page=2` selects `billing`; with `strip_prefix` the
/// backend sees `/invoices?page=2`, otherwise the full path.
pub fn resolve_service<'a>(
    path_and_query: &str,
    services: &'a [Service],
) -> Option<ServiceMatch<'a>> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (segment, rest) = match trimmed.split_once('/') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (trimmed, None),
    };
    if segment.is_empty() {
        return None;
    }
    let service = services.iter().find(|s| s.name == segment)?;

    let mut upstream_path = if service.strip_prefix {
        format!("/{}", rest.unwrap_or(""))
    } else {
        path.to_string()
    };
    if let Some(query) = query {
        upstream_path.push('?');
        upstream_path.push_str(query);
    }
    Some(ServiceMatch { service, upstream_path })
}

/// Send the request to `target` and wait for the response headers.
///
/// Exceeding `deadline` yields `BackendTimeout`; connection and protocol
/// failures yield `BackendUnavailable`.
pub async fn forward(
    req: Request<Incoming>,
    target: Uri,
    service: &str,
    client: &HttpClient,
    deadline: Duration,
    metrics: Option<&Arc<Metrics>>,
) -> HttpResult<Response<RespBody>> {
    let start = Instant::now();
    let (mut parts, body) = req.into_parts();
    parts.uri = target;
    // the client derives Host from the upstream URI
    parts.headers.remove(http::header::HOST);
    debug!(service, uri = %parts.uri, "forwarding to backend");
    let out_req = Request::from_parts(parts, body);

    let result = tokio::time::timeout(deadline, client.request(out_req)).await;
    let duration = start.elapsed().as_secs_f64();

    let error = match result {
        Ok(Ok(resp)) => {
            if let Some(m) = metrics {
                m.record_backend_request(service, resp.status().as_u16(), duration);
            }
            return Ok(resp.map(|b| b.boxed()));
        }
        Ok(Err(e)) => HttpError::BackendUnavailable(e.to_string()),
        Err(_) => HttpError::BackendTimeout,
    };
    if let Some(m) = metrics {
        m.record_backend_error(service, error.code());
    }
    Err(error)
}
