use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const SERVICE: &str = "service";
    pub const STATUS_CODE: &str = "status_code";
    pub const METHOD: &str = "method";
    pub const RESULT: &str = "result";
    pub const LIMIT_TYPE: &str = "limit_type";
    pub const REASON: &str = "reason";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const CACHE_HIT: &str = "hit";
    pub const CACHE_MISS: &str = "miss";
    pub const CACHE_EXPIRED: &str = "expired";
    pub const RATE_ALLOWED: &str = "allowed";
    pub const RATE_DENIED: &str = "denied";
    pub const RATE_DEGRADED: &str = "degraded";
    pub const RATE_UNAVAILABLE: &str = "unavailable";
    pub const REFRESH_OK: &str = "ok";
    pub const REFRESH_FAILED: &str = "failed";
    pub const USAGE_ENQUEUED: &str = "enqueued";
    pub const USAGE_DROPPED: &str = "dropped";
    pub const USAGE_PUBLISHED: &str = "published";
    pub const USAGE_FAILED: &str = "failed";
}

#[derive(Clone)]
pub struct Metrics {
    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,
    pub errors_total: Counter<u64>,

    // Admission
    pub auth_failures_total: Counter<u64>,
    pub cache_lookups_total: Counter<u64>,
    pub cache_refresh_total: Counter<u64>,
    pub cache_entries: Gauge<u64>,
    pub rate_limit_decisions_total: Counter<u64>,
    pub rate_limit_duration_seconds: Histogram<f64>,

    // Backends
    pub backend_requests_total: Counter<u64>,
    pub backend_errors_total: Counter<u64>,
    pub backend_duration_seconds: Histogram<f64>,

    // Usage pipeline
    pub usage_events_total: Counter<u64>,
    pub usage_batches_total: Counter<u64>,

    pub build_info: Gauge<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("tollgate_requests_total")
                .with_description("Total number of requests processed")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("tollgate_requests_duration_seconds")
                .with_description("Request duration in seconds, admission included")
                .build(),
            errors_total: meter
                .u64_counter("tollgate_errors_total")
                .with_description("Total number of requests answered with a gateway error")
                .build(),

            auth_failures_total: meter
                .u64_counter("tollgate_auth_failures_total")
                .with_description("Authentication failures by reason (missing, invalid, unavailable)")
                .build(),
            cache_lookups_total: meter
                .u64_counter("tollgate_cache_lookups_total")
                .with_description("Tenant cache lookups. result=hit|miss|expired")
                .build(),
            cache_refresh_total: meter
                .u64_counter("tollgate_cache_refresh_total")
                .with_description("Tenant cache refresh cycles. result=ok|failed")
                .build(),
            cache_entries: meter
                .u64_gauge("tollgate_cache_entries")
                .with_description("Entries in the current tenant cache generation")
                .build(),
            rate_limit_decisions_total: meter
                .u64_counter("tollgate_rate_limit_decisions_total")
                .with_description("Rate limiter outcomes. result=allowed|denied|degraded|unavailable")
                .build(),
            rate_limit_duration_seconds: meter
                .f64_histogram("tollgate_rate_limit_duration_seconds")
                .with_description("Check-and-increment round-trip duration in seconds")
                .build(),

            backend_requests_total: meter
                .u64_counter("tollgate_backend_requests_total")
                .with_description("Total number of requests forwarded to backends")
                .build(),
            backend_errors_total: meter
                .u64_counter("tollgate_backend_errors_total")
                .with_description("Backend failures (unavailable, timeout)")
                .build(),
            backend_duration_seconds: meter
                .f64_histogram("tollgate_backend_duration_seconds")
                .with_description("Backend request duration in seconds")
                .build(),

            usage_events_total: meter
                .u64_counter("tollgate_usage_events_total")
                .with_description("Usage events by outcome. result=enqueued|dropped|published|failed")
                .build(),
            usage_batches_total: meter
                .u64_counter("tollgate_usage_batches_total")
                .with_description("Usage batches published to the sink")
                .build(),

            build_info: meter
                .u64_gauge("tollgate_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_request(&self, method: &str, status_code: u16, service: &str, duration: f64) {
        let attrs = [
            KeyValue::new(labels::METHOD, method.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
            KeyValue::new(labels::SERVICE, service.to_string()),
        ];
        self.requests_total.add(1, &attrs);
        self.requests_duration_seconds.record(duration, &attrs);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures_total
            .add(1, &[KeyValue::new(labels::REASON, reason.to_string())]);
    }

    pub fn record_cache_lookup(&self, result: &'static str) {
        self.cache_lookups_total
            .add(1, &[KeyValue::new(labels::RESULT, result)]);
    }

    pub fn record_cache_refresh(&self, result: &'static str, entries: Option<u64>) {
        self.cache_refresh_total
            .add(1, &[KeyValue::new(labels::RESULT, result)]);
        if let Some(entries) = entries {
            self.cache_entries.record(entries, &[]);
        }
    }

    pub fn record_rate_limit(&self, result: &'static str, limit_type: Option<&'static str>) {
        match limit_type {
            Some(limit_type) => self.rate_limit_decisions_total.add(
                1,
                &[
                    KeyValue::new(labels::RESULT, result),
                    KeyValue::new(labels::LIMIT_TYPE, limit_type),
                ],
            ),
            None => self
                .rate_limit_decisions_total
                .add(1, &[KeyValue::new(labels::RESULT, result)]),
        }
    }

    pub fn record_rate_limit_duration(&self, duration: f64) {
        self.rate_limit_duration_seconds.record(duration, &[]);
    }

    pub fn record_backend_request(&self, service: &str, status_code: u16, duration: f64) {
        let attrs = [
            KeyValue::new(labels::SERVICE, service.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
        ];
        self.backend_requests_total.add(1, &attrs);
        self.backend_duration_seconds.record(duration, &attrs);
    }

    pub fn record_backend_error(&self, service: &str, error_type: &str) {
        self.backend_errors_total.add(
            1,
            &[
                KeyValue::new(labels::SERVICE, service.to_string()),
                KeyValue::new(labels::ERROR_TYPE, error_type.to_string()),
            ],
        );
    }

    pub fn record_usage_events(&self, result: &'static str, count: u64) {
        if count > 0 {
            self.usage_events_total
                .add(count, &[KeyValue::new(labels::RESULT, result)]);
        }
    }

    pub fn record_usage_batch(&self) {
        self.usage_batches_total.add(1, &[]);
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("tollgate");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
