use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::{Config, CounterStoreConfig, FailurePolicy, Service, SinkConfig};
use crate::error::{GatewayError, Result};

/// Prefix of every environment variable recognised by [`apply_env_overrides`]
pub const ENV_PREFIX: &str = "TOLLGATE_";

/// Load a TOML file, apply `TOLLGATE_*` environment overrides, then validate
pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GatewayError::Config(format!("Failed to read config file: {e}")))?;
    let mut cfg: Config = toml::from_str(&txt)
        .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))?;

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    validate_config(&cfg)?;

    Ok(cfg)
}

/// Override file settings from environment-style variables.
///
/// `lookup` receives the full variable name (e.g. `TOLLGATE_EVENT_BATCH_SIZE`) so tests
/// can inject values without touching the process environment.
///
/// Recognised variables:
/// - `TOLLGATE_LISTEN`
/// - `TOLLGATE_CACHE_REFRESH_SECS`
/// - `TOLLGATE_RATE_LIMIT_FAILURE_POLICY` (`fail_open` | `fail_closed`)
/// - `TOLLGATE_REDIS_URL`
/// - `TOLLGATE_EVENT_BUFFER_CAPACITY`, `TOLLGATE_EVENT_BATCH_SIZE`,
///   `TOLLGATE_EVENT_FLUSH_INTERVAL_MS`
/// - `TOLLGATE_KAFKA_BROKERS`, `TOLLGATE_KAFKA_TOPIC`
/// - `TOLLGATE_SERVICES` (`name=url,name=url`, replaces the file list)
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(v) = var("LISTEN") {
        cfg.listen = parse_value("LISTEN", &v)?;
    }
    if let Some(v) = var("CACHE_REFRESH_SECS") {
        cfg.cache.refresh_interval_secs = parse_value("CACHE_REFRESH_SECS", &v)?;
    }
    if let Some(v) = var("RATE_LIMIT_FAILURE_POLICY") {
        cfg.rate_limit.failure_policy = match v.trim() {
            "fail_open" | "open" => FailurePolicy::FailOpen,
            "fail_closed" | "closed" => FailurePolicy::FailClosed,
            other => {
                return Err(GatewayError::Config(format!(
                    "{ENV_PREFIX}RATE_LIMIT_FAILURE_POLICY: unknown policy '{other}'"
                )))
            }
        };
    }
    if let Some(url) = var("REDIS_URL") {
        cfg.rate_limit.store = CounterStoreConfig::Redis { url };
    }
    if let Some(v) = var("EVENT_BUFFER_CAPACITY") {
        cfg.usage.buffer_capacity = parse_value("EVENT_BUFFER_CAPACITY", &v)?;
    }
    if let Some(v) = var("EVENT_BATCH_SIZE") {
        cfg.usage.batch_size = parse_value("EVENT_BATCH_SIZE", &v)?;
    }
    if let Some(v) = var("EVENT_FLUSH_INTERVAL_MS") {
        cfg.usage.flush_interval_ms = parse_value("EVENT_FLUSH_INTERVAL_MS", &v)?;
    }
    if let Some(brokers) = var("KAFKA_BROKERS") {
        cfg.usage.sink = SinkConfig::Kafka { brokers };
    }
    if let Some(topic) = var("KAFKA_TOPIC") {
        cfg.usage.topic = topic;
    }
    if let Some(v) = var("SERVICES") {
        cfg.services = parse_services(&v)?;
    }

    Ok(())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| GatewayError::Config(format!("{ENV_PREFIX}{name}: {e}")))
}

fn parse_services(raw: &str) -> Result<Vec<Service>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, url) = pair.split_once('=').ok_or_else(|| {
                GatewayError::Config(format!(
                    "{ENV_PREFIX}SERVICES: expected name=url, got '{pair}'"
                ))
            })?;
            Ok(Service {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
                strip_prefix: true,
            })
        })
        .collect()
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.services.is_empty() {
        return Err(GatewayError::NoServices);
    }

    let mut names = HashSet::new();
    for service in &cfg.services {
        if service.name.trim().is_empty() || service.name.contains('/') {
            return Err(GatewayError::Config(format!(
                "Invalid service name: '{}'",
                service.name
            )));
        }
        if !names.insert(service.name.as_str()) {
            return Err(GatewayError::Config(format!(
                "Duplicate service name: {}",
                service.name
            )));
        }
        let uri: http::Uri = service.url.parse()?;
        if uri.scheme_str() != Some("http") || uri.authority().is_none() {
            return Err(GatewayError::Config(format!(
                "Service {} must use an http://host[:port] URL, got {}",
                service.name, service.url
            )));
        }
    }

    if cfg.cache.refresh_interval_secs == 0 {
        return Err(GatewayError::Config("cache.refresh_interval_secs must be > 0".into()));
    }
    if cfg.cache.entry_ttl_secs == 0 {
        return Err(GatewayError::Config("cache.entry_ttl_secs must be > 0".into()));
    }
    if cfg.rate_limit.timeout_ms == 0 {
        return Err(GatewayError::Config("rate_limit.timeout_ms must be > 0".into()));
    }
    if cfg.usage.buffer_capacity == 0 {
        return Err(GatewayError::Config("usage.buffer_capacity must be > 0".into()));
    }
    if cfg.usage.batch_size == 0 {
        return Err(GatewayError::Config("usage.batch_size must be > 0".into()));
    }
    if cfg.usage.flush_interval_ms == 0 {
        return Err(GatewayError::Config("usage.flush_interval_ms must be > 0".into()));
    }
    if cfg.timeout.request_ms == 0 {
        return Err(GatewayError::Config("timeout.request_ms must be > 0".into()));
    }

    Ok(())
}
