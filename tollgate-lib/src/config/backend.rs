use serde::Deserialize;

/// Backend service reachable through the gateway
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Service {
    /// Logical service name, matched against the first path segment
    /// Example: name = "billing" serves "/billing/invoices"
    pub name: String,
    /// Base URL of the backend (http only)
    /// Example: "http://billing:8080" or "http://10.0.0.4:9000/api"
    pub url: String,
    /// Strip the "/{name}" segment before forwarding
    /// Request: /billing/invoices → Backend: {url}/invoices
    /// Default: true
    #[serde(default = "default_true")]
    pub strip_prefix: bool,
}

/// Configuration for backend connection pool
///
/// Connection pooling reuses TCP connections to backend services so that a
/// proxied request does not pay a handshake every time.
#[derive(Clone, Debug, Deserialize)]
pub struct BackendPoolConfig {
    /// Idle timeout in seconds for pooled connections
    /// Default: 90 seconds
    #[serde(default = "default_backend_pool_idle_timeout")]
    pub idle_timeout: u64,

    /// Maximum number of idle connections to maintain per host
    /// 0 = unlimited (hyper default)
    /// Default: 0 (unlimited)
    #[serde(default)]
    pub pool_max_idle_per_host: usize,
}

impl Default for BackendPoolConfig {
    fn default() -> Self {
        Self { idle_timeout: default_backend_pool_idle_timeout(), pool_max_idle_per_host: 0 }
    }
}

fn default_true() -> bool {
    true
}

fn default_backend_pool_idle_timeout() -> u64 {
    90
}
