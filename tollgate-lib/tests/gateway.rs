use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tollgate_lib::config::{Config, FailurePolicy, Service};
use tollgate_lib::ratelimit::{CounterStore, MemoryCounterStore};
use tollgate_lib::tenant::{Fingerprint, MemoryDirectory, RateLimitSpec, TenantRecord};
use tollgate_lib::usage::{EventSink, MemorySink};
use tollgate_lib::{Collaborators, Gateway};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type TestResult = Result<(), BoxError>;

const GOOD_KEY: &str = "tg_live_good";
const TIGHT_KEY: &str = "tg_live_tight";

/// Backend that echoes what it received as JSON
async fn spawn_backend() -> Result<SocketAddr, BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let svc = hyper::service::service_fn(|req: Request<Incoming>| async move {
                    let header = |name: &str| {
                        req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
                    };
                    let body = json!({
                        "path": req.uri().path_and_query().map(|pq| pq.as_str()),
                        "organization_id": header("x-organization-id"),
                        "api_key_id": header("x-api-key-id"),
                        "request_id": header("x-request-id"),
                        "authorization": header("authorization"),
                        "x_api_key": header("x-api-key"),
                        "forwarded_for": header("x-forwarded-for"),
                    });
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body.to_string()))))
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
            });
        }
    });
    Ok(addr)
}

struct Harness {
    base: String,
    client: reqwest::Client,
    sink: Arc<MemorySink>,
    counters: Arc<MemoryCounterStore>,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<tollgate_lib::Result<()>>>,
}

impl Harness {
    async fn start(policy: FailurePolicy) -> Result<Self, BoxError> {
        let backend = spawn_backend().await?;
        let mut config = Config::new(
            "127.0.0.1:0".parse()?,
            vec![
                Service {
                    name: "billing".into(),
                    url: format!("http://{backend}"),
                    strip_prefix: true,
                },
                Service {
                    name: "offline".into(),
                    // nothing listens on the discard port
                    url: "http://127.0.0.1:9".into(),
                    strip_prefix: true,
                },
            ],
        );
        config.rate_limit.failure_policy = policy;
        config.usage.flush_interval_ms = 20;
        config.timeout.shutdown_secs = 5;

        let directory = MemoryDirectory::with_keys([
            (
                Fingerprint::of(GOOD_KEY),
                TenantRecord {
                    organization_id: "org_1".into(),
                    api_key_id: "key_good".into(),
                    rate_limit: RateLimitSpec::new(1000, 100_000, 500),
                },
            ),
            (
                Fingerprint::of(TIGHT_KEY),
                TenantRecord {
                    organization_id: "org_2".into(),
                    api_key_id: "key_tight".into(),
                    rate_limit: RateLimitSpec::new(100, 3, 0),
                },
            ),
        ]);
        let sink = Arc::new(MemorySink::new());
        let counters = Arc::new(MemoryCounterStore::new());
        let counter_store: Arc<dyn CounterStore> = counters.clone();
        let event_sink: Arc<dyn EventSink> = sink.clone();
        let collaborators = Collaborators {
            directory: Arc::new(directory),
            counters: counter_store,
            sink: event_sink,
        };

        let gateway = Gateway::start(&config, &collaborators, None);
        for _ in 0..200 {
            if gateway.is_warm() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if !gateway.is_warm() {
            return Err("tenant cache never warmed".into());
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(gateway.serve(listener, async move {
            let _ = stop_rx.await;
        }));

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base,
            client,
            sink,
            counters,
            stop: Some(stop_tx),
            server: Some(server),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{path}", self.base))
    }

    async fn shutdown(&mut self) -> TestResult {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(server) = self.server.take() {
            server.await??;
        }
        Ok(())
    }
}

async fn error_code(resp: reqwest::Response) -> Result<String, BoxError> {
    let body: Value = resp.json().await?;
    Ok(body["error"]["code"].as_str().unwrap_or_default().to_string())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admitted_request_reaches_backend_with_identity() -> TestResult {
    let mut h = Harness::start(FailurePolicy::FailOpen).await?;

    let resp = h.get("/billing/invoices?page=2").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 200);
    let headers = resp.headers().clone();
    assert_eq!(headers.get("x-ratelimit-limit-minute").ok_or("limit header")?, "1500");
    assert_eq!(headers.get("x-ratelimit-remaining-day").ok_or("remaining header")?, "99999");
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .ok_or("request id header")?
        .to_string();

    let seen: Value = resp.json().await?;
    assert_eq!(seen["path"], "/invoices?page=2");
    assert_eq!(seen["organization_id"], "org_1");
    assert_eq!(seen["api_key_id"], "key_good");
    assert_eq!(seen["request_id"], request_id.as_str());
    assert_eq!(seen["authorization"], Value::Null);
    assert_eq!(seen["forwarded_for"], "127.0.0.1");

    let resp = h.get("/billing/status").header("x-api-key", GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 200);
    let seen: Value = resp.json().await?;
    assert_eq!(seen["x_api_key"], Value::Null);

    h.shutdown().await?;
    let events = h.sink.events();
    assert_eq!(events.len(), 2);
    let first = events.iter().find(|e| e.request_id == request_id).ok_or("event missing")?;
    assert_eq!(first.organization_id, "org_1");
    assert_eq!(first.endpoint, "/billing/invoices");
    assert_eq!(first.method, "GET");
    assert_eq!(first.status_code, 200);
    assert!(first.billable);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_requests_get_json_errors_and_no_usage() -> TestResult {
    let mut h = Harness::start(FailurePolicy::FailOpen).await?;

    let resp = h.get("/billing/invoices").send().await?;
    assert_eq!(resp.status(), 401);
    assert_eq!(error_code(resp).await?, "auth_missing");

    let resp = h.get("/billing/invoices").bearer_auth("tg_live_unknown").send().await?;
    assert_eq!(resp.status(), 401);
    assert_eq!(error_code(resp).await?, "auth_invalid");

    let resp = h.get("/nowhere/else").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 404);
    assert_eq!(error_code(resp).await?, "unknown_service");

    h.shutdown().await?;
    assert!(h.sink.events().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daily_quota_is_enforced_with_retry_after() -> TestResult {
    let mut h = Harness::start(FailurePolicy::FailOpen).await?;

    for _ in 0..3 {
        let resp = h.get("/billing/invoices").bearer_auth(TIGHT_KEY).send().await?;
        assert_eq!(resp.status(), 200);
    }
    let resp = h.get("/billing/invoices").bearer_auth(TIGHT_KEY).send().await?;
    assert_eq!(resp.status(), 429);
    let retry_after: u64 = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .ok_or("retry-after header")?
        .parse()?;
    assert!(retry_after > 0);
    assert_eq!(resp.headers().get("x-ratelimit-remaining-day").ok_or("header")?, "0");

    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
    assert_eq!(body["error"]["limit_type"], "daily");
    assert_eq!(body["error"]["daily_count"], 3);
    assert_eq!(body["error"]["retry_after_secs"], retry_after);

    // other tenants have their own counters
    let resp = h.get("/billing/invoices").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 200);

    h.shutdown().await?;
    assert_eq!(h.sink.events().len(), 4);
    Ok(())
}

/// Keeps a burst of requests inside one wall-clock minute
async fn wait_for_fresh_minute() {
    let second = Utc::now().second();
    if second > 40 {
        tokio::time::sleep(Duration::from_secs(u64::from(61 - second))).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn minute_ceiling_is_rate_plus_burst_end_to_end() -> TestResult {
    let mut h = Harness::start(FailurePolicy::FailOpen).await?;
    wait_for_fresh_minute().await;

    let workers: Vec<_> = (0..10)
        .map(|_| {
            let request = h.get("/billing/invoices").bearer_auth(GOOD_KEY);
            tokio::spawn(async move {
                let mut admitted = 0u32;
                for _ in 0..150 {
                    let resp = request.try_clone().ok_or("request not cloneable")?.send().await?;
                    if resp.status() == 200 {
                        admitted += 1;
                    }
                }
                Ok::<u32, BoxError>(admitted)
            })
        })
        .collect();
    let mut admitted = 0;
    for worker in workers {
        admitted += worker.await??;
    }
    assert_eq!(admitted, 1500);

    let resp = h.get("/billing/invoices").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().get("retry-after").is_some());
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
    assert_eq!(body["error"]["limit_type"], "minute");
    assert_eq!(body["error"]["minute_count"], 1500);

    h.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_failure_is_metered_as_non_billable() -> TestResult {
    let mut h = Harness::start(FailurePolicy::FailOpen).await?;

    let resp = h.get("/offline/ping").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 502);
    assert_eq!(error_code(resp).await?, "backend_unavailable");

    h.shutdown().await?;
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status_code, 502);
    assert!(!events[0].billable);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn counter_store_outage_follows_failure_policy() -> TestResult {
    let mut open = Harness::start(FailurePolicy::FailOpen).await?;
    open.counters.set_available(false);
    let resp = open.get("/billing/invoices").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("x-ratelimit-limit-minute").is_none());
    open.shutdown().await?;

    let mut closed = Harness::start(FailurePolicy::FailClosed).await?;
    closed.counters.set_available(false);
    let resp = closed.get("/billing/invoices").bearer_auth(GOOD_KEY).send().await?;
    assert_eq!(resp.status(), 503);
    assert_eq!(error_code(resp).await?, "rate_limiter_unavailable");
    closed.shutdown().await?;
    assert!(closed.sink.events().is_empty());
    Ok(())
}
