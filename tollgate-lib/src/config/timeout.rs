use serde::Deserialize;

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Backend connect timeout in milliseconds
    /// Default: 5000 (5 seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
    /// Deadline for a proxied request, from admission to backend response headers
    /// Exceeding it yields 504 backend_timeout
    /// Default: 30000 (30 seconds)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,
    /// Graceful shutdown timeout in seconds
    /// Bounds the wait for open connections, the refresh task and the usage drain
    /// Default: 30
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_secs: u64,
    /// HTTP/1.1 keep-alive configuration for backend connections
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            request_ms: default_request_timeout(),
            shutdown_secs: default_shutdown_timeout(),
            keep_alive: KeepAliveConfig::default(),
        }
    }
}

/// TCP keep-alive for backend connections
#[derive(Debug, Deserialize, Clone)]
pub struct KeepAliveConfig {
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keep-alive probe interval in seconds
    /// Default: 60 seconds
    #[serde(default = "default_keep_alive_timeout")]
    pub timeout_secs: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self { enabled: true, timeout_secs: default_keep_alive_timeout() }
    }
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    30000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_timeout() -> u64 {
    60
}
