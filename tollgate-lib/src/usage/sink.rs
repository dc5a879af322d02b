use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::event::UsageEvent;

/// One message handed to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRecord {
    /// Partition key (the organization id)
    pub key: String,
    pub payload: Bytes,
}

impl SinkRecord {
    pub fn from_event(event: &UsageEvent) -> Result<Self, SinkError> {
        Ok(Self {
            key: event.partition_key().to_string(),
            payload: Bytes::from(serde_json::to_vec(event)?),
        })
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("failed to encode usage event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("sink flush did not finish within {0:?}")]
    FlushTimeout(Duration),
    #[error("sink configuration error: {0}")]
    Config(String),
}

/// Destination of usage batches (message broker or stand-in).
///
/// `publish` must keep the order of `records` for records sharing a key.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, records: &[SinkRecord]) -> Result<(), SinkError>;

    /// Wait for in-flight deliveries
    async fn flush(&self, _timeout: Duration) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every record to the log at debug level
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, topic: &str, records: &[SinkRecord]) -> Result<(), SinkError> {
        for record in records {
            debug!(
                topic,
                key = %record.key,
                payload = %String::from_utf8_lossy(&record.payload),
                "usage event"
            );
        }
        Ok(())
    }
}

/// Keeps published batches in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<SinkRecord>>>,
    failures_left: AtomicUsize,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publish calls fail
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::Release);
    }

    pub fn batches(&self) -> Vec<Vec<SinkRecord>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Every published event in publish order
    pub fn events(&self) -> Vec<UsageEvent> {
        self.batches()
            .iter()
            .flatten()
            .filter_map(|record| serde_json::from_slice(&record.payload).ok())
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, _topic: &str, records: &[SinkRecord]) -> Result<(), SinkError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::Publish("memory sink failure injected".into()));
        }
        self.batches
            .lock()
            .map_err(|_| SinkError::Publish("memory sink lock poisoned".into()))?
            .push(records.to_vec());
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
