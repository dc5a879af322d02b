use serde::Deserialize;
use std::time::Duration;

/// Destination of usage-event batches
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Kafka topic (requires the `kafka` cargo feature)
    Kafka {
        /// Comma-separated bootstrap servers, e.g. "kafka-1:9092,kafka-2:9092"
        brokers: String,
    },
    /// Write batches to the log at debug level
    #[default]
    Log,
}

/// Usage event pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UsageConfig {
    #[serde(default)]
    pub sink: SinkConfig,
    /// Topic every usage event is published to
    /// Default: "usage-events"
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Capacity of the in-memory event buffer; events beyond it are dropped
    /// Default: 1000
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Events per batch that trigger an immediate flush
    /// Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum time a non-empty batch waits before being flushed, in milliseconds
    /// Default: 500
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    /// Extra attempts for a batch whose publish failed, before it is dropped
    /// Default: 2
    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,
}

impl UsageConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            topic: default_topic(),
            buffer_capacity: default_buffer_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            publish_retries: default_publish_retries(),
        }
    }
}

fn default_topic() -> String {
    "usage-events".to_string()
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    500
}

fn default_publish_retries() -> u32 {
    2
}
