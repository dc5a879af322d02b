use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, CounterStoreConfig, DirectoryConfig, Service, SinkConfig};
use crate::error::Result;
use crate::proxy::ClientPool;
use crate::ratelimit::{
    CounterStore, DistributedRateLimiter, MemoryCounterStore, RedisCounterStore,
};
use crate::telemetry::Metrics;
use crate::tenant::{
    Authenticator, FileDirectory, MemoryDirectory, TenantCache, TenantDirectory,
};
use crate::usage::{EventSink, LogSink, UsageEmitter};

/// External systems the admission pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn TenantDirectory>,
    pub counters: Arc<dyn CounterStore>,
    pub sink: Arc<dyn EventSink>,
}

impl Collaborators {
    /// Build every collaborator named by the configuration.
    ///
    /// Connects to Redis when it is the counter store, so an unreachable
    /// Redis fails startup.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let directory: Arc<dyn TenantDirectory> = match &config.directory {
            DirectoryConfig::File { path } => {
                info!(path = %path.display(), "tenant directory: key file");
                Arc::new(FileDirectory::new(path.clone()))
            }
            DirectoryConfig::Memory => {
                info!("tenant directory: in-memory (empty until provisioned)");
                Arc::new(MemoryDirectory::new())
            }
        };

        let counters: Arc<dyn CounterStore> = match &config.rate_limit.store {
            CounterStoreConfig::Redis { url } => Arc::new(RedisCounterStore::connect(url).await?),
            CounterStoreConfig::Memory => {
                info!("rate limit counters: in-memory (single instance only)");
                Arc::new(MemoryCounterStore::new())
            }
        };

        let sink: Arc<dyn EventSink> = match &config.usage.sink {
            #[cfg(feature = "kafka")]
            SinkConfig::Kafka { brokers } => Arc::new(crate::usage::KafkaSink::new(brokers)?),
            #[cfg(not(feature = "kafka"))]
            SinkConfig::Kafka { .. } => {
                return Err(crate::error::GatewayError::Config(
                    "usage sink 'kafka' requires building with the `kafka` feature".to_string(),
                ));
            }
            SinkConfig::Log => Arc::new(LogSink),
        };

        Ok(Self { directory, counters, sink })
    }
}

/// Everything a request task needs, shared behind one `Arc`
pub struct GatewayState {
    pub services: Vec<Service>,
    pub cache: Arc<TenantCache>,
    pub authenticator: Authenticator,
    pub limiter: DistributedRateLimiter,
    pub emitter: UsageEmitter,
    pub client_pool: ClientPool,
    pub request_timeout: Duration,
    pub metrics: Option<Arc<Metrics>>,
}

impl GatewayState {
    /// Wire the pipeline components. Spawns the usage worker, so it must run
    /// inside a tokio runtime.
    pub fn new(
        config: &Config,
        cache: Arc<TenantCache>,
        collaborators: &Collaborators,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let mut authenticator = Authenticator::new(
            Arc::clone(&cache),
            Arc::clone(&collaborators.directory),
            config.cache.entry_ttl(),
        );
        let mut limiter =
            DistributedRateLimiter::new(Arc::clone(&collaborators.counters), &config.rate_limit);
        if let Some(m) = &metrics {
            authenticator = authenticator.with_metrics(Arc::clone(m));
            limiter = limiter.with_metrics(Arc::clone(m));
        }
        let emitter =
            UsageEmitter::start(Arc::clone(&collaborators.sink), &config.usage, metrics.clone());

        Self {
            services: config.services.clone(),
            cache,
            authenticator,
            limiter,
            emitter,
            client_pool: ClientPool::new(&config.timeout, &config.backend_pool),
            request_timeout: Duration::from_millis(config.timeout.request_ms),
            metrics,
        }
    }
}
