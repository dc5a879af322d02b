use serde::Deserialize;
use std::net::SocketAddr;

use super::admission::{CacheConfig, DirectoryConfig, RateLimitConfig};
use super::backend::{BackendPoolConfig, Service};
use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::timeout::TimeoutConfig;
use super::usage::UsageConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to listen on
    /// Example: "0.0.0.0:8080"
    pub listen: SocketAddr,
    /// Backend services, addressed by the first path segment
    /// At least one service is required
    pub services: Vec<Service>,
    /// Tenant cache refresh and TTL settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Where API keys are loaded from
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Distributed rate limiter settings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Usage event pipeline settings
    #[serde(default)]
    pub usage: UsageConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Backend connection pool
    #[serde(default)]
    pub backend_pool: BackendPoolConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Minimal configuration with defaults for every optional section
    pub fn new(listen: SocketAddr, services: Vec<Service>) -> Self {
        Self {
            listen,
            services,
            cache: CacheConfig::default(),
            directory: DirectoryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            usage: UsageConfig::default(),
            timeout: TimeoutConfig::default(),
            backend_pool: BackendPoolConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
