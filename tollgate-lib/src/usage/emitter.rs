use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::event::UsageEvent;
use super::sink::{EventSink, SinkError, SinkRecord};
use crate::config::UsageConfig;
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Counters of the emission pipeline since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Accepted into the buffer
    pub enqueued: u64,
    /// Refused because the buffer was full or the emitter closed
    pub dropped: u64,
    /// Acknowledged by the sink
    pub published: u64,
    /// Given up on after the publish retries ran out
    pub failed: u64,
    /// Successful publish calls
    pub batches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EmitterStats {
        EmitterStats {
            enqueued: self.enqueued.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            published: self.published.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            batches: self.batches.load(Ordering::Acquire),
        }
    }
}

/// Non-blocking producer side of the usage pipeline.
///
/// `record` never waits: events go into a bounded buffer drained by a single
/// worker task that publishes them in batches, in arrival order.
pub struct UsageEmitter {
    sender: ArcSwapOption<mpsc::Sender<UsageEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn EventSink>,
    counters: Arc<Counters>,
    metrics: Option<Arc<Metrics>>,
}

impl UsageEmitter {
    /// Spawn the batching worker. Must be called inside a tokio runtime.
    pub fn start(
        sink: Arc<dyn EventSink>,
        config: &UsageConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            rx,
            sink: Arc::clone(&sink),
            topic: config.topic.clone(),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            retries: config.publish_retries,
            counters: Arc::clone(&counters),
            metrics: metrics.clone(),
        };
        let handle = tokio::spawn(worker.run());
        info!(
            topic = %config.topic,
            buffer_capacity = config.buffer_capacity,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            "usage emitter started"
        );
        Self {
            sender: ArcSwapOption::from_pointee(tx),
            worker: Mutex::new(Some(handle)),
            sink,
            counters,
            metrics,
        }
    }

    /// Hand an event to the pipeline; returns whether it was accepted.
    ///
    /// A full buffer or a closed emitter drops the event immediately.
    pub fn record(&self, event: UsageEvent) -> bool {
        let guard = self.sender.load();
        let Some(sender) = &*guard else {
            self.drop_event(&event, "usage emitter closed, dropping event");
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::AcqRel);
                self.record_metric(values::USAGE_ENQUEUED, 1);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.drop_event(&event, "usage buffer full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.drop_event(&event, "usage worker gone, dropping event");
                false
            }
        }
    }

    fn drop_event(&self, event: &UsageEvent, message: &'static str) {
        self.counters.dropped.fetch_add(1, Ordering::AcqRel);
        self.record_metric(values::USAGE_DROPPED, 1);
        warn!(
            request_id = %event.request_id,
            organization_id = %event.organization_id,
            "{message}"
        );
    }

    fn record_metric(&self, result: &'static str, count: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_usage_events(result, count);
        }
    }

    pub fn stats(&self) -> EmitterStats {
        self.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.load().is_none()
    }

    /// Stop accepting, drain what is buffered, then flush the sink.
    ///
    /// `timeout` bounds the whole drain. Calling it again is a no-op.
    pub async fn close(&self, timeout_after: Duration) -> Result<(), SinkError> {
        if self.sender.swap(None).is_none() {
            return Ok(());
        }
        let started = Instant::now();
        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match timeout(timeout_after, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "usage worker ended abnormally"),
                Err(_) => {
                    abort.abort();
                    warn!(
                        timeout_ms = timeout_after.as_millis() as u64,
                        "usage drain did not finish in time, remaining events lost"
                    );
                    return Err(SinkError::FlushTimeout(timeout_after));
                }
            }
        }

        let remaining = timeout_after.saturating_sub(started.elapsed());
        self.sink.flush(remaining).await?;
        let stats = self.stats();
        info!(
            published = stats.published,
            dropped = stats.dropped,
            failed = stats.failed,
            "usage emitter closed"
        );
        Ok(())
    }
}

struct Worker {
    rx: mpsc::Receiver<UsageEvent>,
    sink: Arc<dyn EventSink>,
    topic: String,
    batch_size: usize,
    flush_interval: Duration,
    retries: u32,
    counters: Arc<Counters>,
    metrics: Option<Arc<Metrics>>,
}

impl Worker {
    async fn run(mut self) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= self.batch_size {
                            self.publish(&mut batch).await;
                            ticker.reset();
                        }
                    }
                    // every sender gone and the buffer is empty
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.publish(&mut batch).await;
                    }
                }
            }
        }

        if !batch.is_empty() {
            self.publish(&mut batch).await;
        }
        debug!("usage worker exited");
    }

    async fn publish(&self, batch: &mut Vec<UsageEvent>) {
        let events = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            match SinkRecord::from_event(event) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::AcqRel);
                    self.record_metric(values::USAGE_FAILED, 1);
                    error!(
                        request_id = %event.request_id,
                        error = %e,
                        "usage event not encodable"
                    );
                }
            }
        }
        if records.is_empty() {
            return;
        }
        let count = records.len() as u64;

        let mut attempt = 0u32;
        loop {
            match self.sink.publish(&self.topic, &records).await {
                Ok(()) => {
                    self.counters.published.fetch_add(count, Ordering::AcqRel);
                    self.counters.batches.fetch_add(1, Ordering::AcqRel);
                    self.record_metric(values::USAGE_PUBLISHED, count);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_usage_batch();
                    }
                    debug!(topic = %self.topic, count, "usage batch published");
                    return;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        topic = %self.topic,
                        count,
                        attempt,
                        error = %e,
                        "usage publish failed, retrying"
                    );
                    sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(count, Ordering::AcqRel);
                    self.record_metric(values::USAGE_FAILED, count);
                    error!(
                        topic = %self.topic,
                        count,
                        error = %e,
                        "usage batch dropped after retries"
                    );
                    return;
                }
            }
        }
    }

    fn record_metric(&self, result: &'static str, count: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_usage_events(result, count);
        }
    }
}
