use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::sink::{EventSink, SinkError, SinkRecord};

/// Per-record delivery timeout inside librdkafka
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes usage batches to Kafka, keyed by organization id
pub struct KafkaSink {
    producer: Arc<FutureProducer>,
}

impl KafkaSink {
    pub fn new(brokers: &str) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "lz4")
            .set("linger.ms", "5")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| SinkError::Config(format!("failed to create kafka producer: {e}")))?;
        info!(brokers, "kafka usage sink initialized");
        Ok(Self { producer: Arc::new(producer) })
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    /// Enqueue the whole batch, then await every delivery in order.
    ///
    /// A partial failure fails the batch; the emitter retries it, so records
    /// that did land may be delivered twice.
    async fn publish(&self, topic: &str, records: &[SinkRecord]) -> Result<(), SinkError> {
        let mut deliveries = Vec::with_capacity(records.len());
        for record in records {
            let future_record =
                FutureRecord::to(topic).key(&record.key).payload(&record.payload[..]);
            let delivery = self
                .producer
                .send_result(future_record)
                .map_err(|(e, _)| SinkError::Publish(format!("enqueue failed: {e}")))?;
            deliveries.push(delivery);
        }

        let mut failed = 0usize;
        let mut first_error = None;
        for delivery in deliveries {
            let outcome = tokio::time::timeout(DELIVERY_TIMEOUT, delivery).await;
            let error = match outcome {
                Ok(Ok(Ok(_))) => continue,
                Ok(Ok(Err((e, _)))) => e.to_string(),
                Ok(Err(_)) => "delivery canceled".to_string(),
                Err(_) => format!("no delivery report within {DELIVERY_TIMEOUT:?}"),
            };
            failed += 1;
            first_error.get_or_insert(error);
        }
        match first_error {
            None => Ok(()),
            Some(error) => {
                let total = records.len();
                warn!(topic, failed, total, error = %error, "kafka batch partially failed");
                Err(SinkError::Publish(format!("{failed}/{total} records failed: {error}")))
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), SinkError> {
        let producer = Arc::clone(&self.producer);
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::Publish(format!("flush task failed: {e}")))?
            .map_err(|_| SinkError::FlushTimeout(timeout))
    }
}
