use crate::config::{BackendPoolConfig, TimeoutConfig};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

pub type HttpClient = Client<HttpConnector, Incoming>;

/// Shared HTTP client for backend connections.
///
/// Keeps idle HTTP/1.1 connections per backend host so that proxied requests
/// reuse TCP connections instead of dialing for each one. Cloning is cheap
/// and shares the pool.
#[derive(Clone)]
pub struct ClientPool {
    client: HttpClient,
}

impl ClientPool {
    pub fn new(timeouts: &TimeoutConfig, config: &BackendPoolConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(timeouts.connect_ms)));
        // TCP keep-alive: sends periodic packets to keep TCP connection alive
        if timeouts.keep_alive.enabled {
            connector.set_keepalive(Some(Duration::from_secs(timeouts.keep_alive.timeout_secs)));
        } else {
            connector.set_keepalive(None);
        }

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_idle_timeout(Duration::from_secs(config.idle_timeout));

        if config.pool_max_idle_per_host > 0 {
            builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
        }

        Self { client: builder.build(connector) }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}
