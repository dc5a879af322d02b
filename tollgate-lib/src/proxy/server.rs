use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::proxy::connection::ConnectionTracker;
use crate::proxy::context::{Collaborators, GatewayState};
use crate::proxy::handler::handle_gateway_request;
use crate::telemetry::{init_metrics, start_observability_server, Metrics};
use crate::tenant::{RefreshHandle, RefreshManager, RefreshStats, TenantCache};

/// A wired admission pipeline with its background tasks running
pub struct Gateway {
    state: Arc<GatewayState>,
    refresh: RefreshHandle,
    tracker: Arc<ConnectionTracker>,
    stop: CancellationToken,
    shutdown_grace: Duration,
}

impl Gateway {
    /// Build the cache and pipeline, then start the refresh loop and the
    /// usage worker. Must be called inside a tokio runtime.
    pub fn start(
        config: &Config,
        collaborators: &Collaborators,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let cache = Arc::new(TenantCache::new());
        let state = Arc::new(GatewayState::new(
            config,
            Arc::clone(&cache),
            collaborators,
            metrics.clone(),
        ));

        let mut manager =
            RefreshManager::new(cache, Arc::clone(&collaborators.directory), &config.cache);
        if let Some(m) = metrics {
            manager = manager.with_metrics(m);
        }
        let refresh = manager.start(config.cache.refresh_interval());

        Self {
            state,
            refresh,
            tracker: Arc::new(ConnectionTracker::new()),
            stop: CancellationToken::new(),
            shutdown_grace: Duration::from_secs(config.timeout.shutdown_secs),
        }
    }

    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    pub fn cache(&self) -> Arc<TenantCache> {
        Arc::clone(&self.state.cache)
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.refresh.stats()
    }

    /// Whether the first tenant refresh has completed
    pub fn is_warm(&self) -> bool {
        self.refresh.is_warm()
    }

    /// Accept connections until `shutdown` resolves, then drain and stop.
    ///
    /// Open connections get `timeout.shutdown_secs` to finish; afterwards the
    /// refresh loop is stopped and buffered usage events are flushed.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let builder = ConnBuilder::new(TokioExecutor::new());

        let addr = listener.local_addr()?;
        info!(?addr, services = self.state.services.len(), "starting gateway (h1/h2)");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept error");
                            continue;
                        }
                    };
                    self.spawn_connection(&builder, stream, peer);
                }
            }
        }

        self.tracker.begin_shutdown();
        drop(listener);
        self.stop.cancel();

        info!(
            active_connections = self.tracker.active(),
            timeout_secs = self.shutdown_grace.as_secs(),
            "waiting for active connections to finish"
        );
        let remaining = self.tracker.wait_idle(self.shutdown_grace).await;
        if remaining > 0 {
            warn!(active_connections = remaining, "shutdown timeout reached");
        } else {
            info!("all connections closed");
        }

        let grace = self.shutdown_grace;
        self.shutdown(grace).await;
        Ok(())
    }

    fn spawn_connection(
        &self,
        builder: &ConnBuilder<TokioExecutor>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        let guard = match self.tracker.try_accept() {
            Ok(guard) => guard,
            Err(e) => {
                debug!(?peer, error = %e, "rejecting connection");
                return;
            }
        };
        let builder = builder.clone();
        let state = Arc::clone(&self.state);
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                let state = Arc::clone(&state);
                async move {
                    let response = handle_gateway_request(req, state, peer).await;
                    Ok::<_, hyper::Error>(response)
                }
            });

            let conn = builder.serve_connection(TokioIo::new(stream), svc);
            tokio::pin!(conn);
            let result = tokio::select! {
                res = conn.as_mut() => res,
                _ = stop.cancelled() => {
                    // finish in-flight requests, then close
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                debug!(?peer, error = %e, "connection closed with error");
            }
        });
    }

    /// Stop the refresh loop and drain the usage emitter, each bounded by `grace`
    pub async fn shutdown(self, grace: Duration) {
        self.refresh.shutdown(grace).await;
        if let Err(e) = self.state.emitter.close(grace).await {
            error!(error = %e, "usage emitter did not drain cleanly");
        }
        info!("gateway stopped");
    }
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        GatewayError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        GatewayError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
    Ok(())
}

/// Run the gateway described by `config` until SIGTERM/SIGINT
pub async fn run(config: Arc<Config>) -> Result<()> {
    if config.services.is_empty() {
        return Err(GatewayError::NoServices);
    }

    let telemetry = match config.telemetry.metrics_port {
        Some(port) => {
            let (metrics, registry) = init_metrics()
                .map_err(|e| GatewayError::Telemetry(format!("metrics init failed: {e}")))?;
            metrics.set_build_info();
            Some((metrics, registry, port))
        }
        None => None,
    };
    let metrics = telemetry.as_ref().map(|(m, _, _)| Arc::clone(m));

    let collaborators = Collaborators::from_config(&config).await?;
    let gateway = Gateway::start(&config, &collaborators, metrics);

    let observability = CancellationToken::new();
    if let Some((_, registry, port)) = telemetry {
        let addr = SocketAddr::new(config.listen.ip(), port);
        let listener = TcpListener::bind(addr).await?;
        let cache = gateway.cache();
        let token = observability.clone();
        tokio::spawn(async move {
            if let Err(e) = start_observability_server(listener, registry, cache, token).await {
                error!(error = %e, "observability server failed");
            }
        });
    }

    let listener = TcpListener::bind(config.listen).await?;
    let stop = async {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "signal handling unavailable, shutting down");
        }
    };
    let result = gateway.serve(listener, stop).await;
    observability.cancel();
    result
}
