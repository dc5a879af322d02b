mod admission;
mod backend;
mod loader;
mod root;
mod telemetry;
mod timeout;
mod usage;

pub use admission::{
    CacheConfig, CounterStoreConfig, DirectoryConfig, FailurePolicy, RateLimitConfig,
};
pub use backend::{BackendPoolConfig, Service};
pub use loader::{apply_env_overrides, load_from_path, validate_config, ENV_PREFIX};
pub use root::Config;
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::{KeepAliveConfig, TimeoutConfig};
pub use usage::{SinkConfig, UsageConfig};
