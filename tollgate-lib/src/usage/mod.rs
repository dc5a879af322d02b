//! Usage metering: events, sinks and the batching emitter.

mod emitter;
mod event;
#[cfg(feature = "kafka")]
mod kafka;
mod sink;

pub use emitter::{EmitterStats, UsageEmitter};
pub use event::{is_billable, UsageEvent};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSink;
pub use sink::{EventSink, LogSink, MemorySink, SinkError, SinkRecord};
