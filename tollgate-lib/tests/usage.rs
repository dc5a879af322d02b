use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tollgate_lib::config::UsageConfig;
use tollgate_lib::usage::{is_billable, EventSink, MemorySink, UsageEmitter, UsageEvent};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn usage_config(buffer_capacity: usize, batch_size: usize) -> UsageConfig {
    UsageConfig {
        buffer_capacity,
        batch_size,
        flush_interval_ms: 500,
        publish_retries: 2,
        ..UsageConfig::default()
    }
}

fn event(i: usize, org: &str, status: u16) -> UsageEvent {
    UsageEvent::new(
        format!("req-{i}"),
        org,
        "key_1",
        "/billing/invoices",
        "GET",
        status,
        12,
        Utc::now(),
    )
}

fn start(sink: &Arc<MemorySink>, config: &UsageConfig) -> UsageEmitter {
    let sink: Arc<dyn EventSink> = sink.clone();
    UsageEmitter::start(sink, config, None)
}

#[test]
fn billable_statuses() {
    for status in [200, 201, 302, 404, 429, 499] {
        assert!(is_billable(status), "{status} should be billable");
    }
    for status in [100, 500, 502, 503, 504] {
        assert!(!is_billable(status), "{status} should not be billable");
    }
    assert!(event(0, "org_1", 404).billable);
    assert!(!event(0, "org_1", 503).billable);
}

#[test]
fn event_serializes_camel_case() -> TestResult {
    let json = serde_json::to_value(event(7, "org_1", 200))?;
    assert_eq!(json["requestId"], "req-7");
    assert_eq!(json["organizationId"], "org_1");
    assert_eq!(json["statusCode"], 200);
    assert_eq!(json["responseTimeMs"], 12);
    assert_eq!(json["billable"], true);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn full_batch_flushes_immediately() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    let emitter = start(&sink, &usage_config(1000, 100));

    for i in 0..100 {
        assert!(emitter.record(event(i, "org_1", 200)));
    }
    // well before the flush interval
    tokio::time::sleep(Duration::from_millis(10)).await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 100);
    assert_eq!(emitter.stats().published, 100);
    emitter.close(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn partial_batch_flushes_after_interval() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    let emitter = start(&sink, &usage_config(1000, 100));

    assert!(emitter.record(event(1, "org_1", 200)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sink.batches().is_empty());

    tokio::time::sleep(Duration::from_millis(450)).await;
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].key, "org_1");

    // an idle interval publishes nothing
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.batches().len(), 1);
    emitter.close(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test]
async fn full_buffer_drops_instead_of_blocking() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    let emitter = start(&sink, &usage_config(2, 100));

    // the worker cannot drain while this task holds the thread
    let accepted: Vec<bool> = (0..5).map(|i| emitter.record(event(i, "org_1", 200))).collect();
    assert_eq!(accepted, [true, true, false, false, false]);

    let stats = emitter.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.dropped, 3);

    emitter.close(Duration::from_secs(5)).await?;
    assert_eq!(sink.events().len(), 2);
    Ok(())
}

#[tokio::test]
async fn close_drains_buffer_and_flushes_sink() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    let emitter = start(&sink, &usage_config(1000, 100));

    for i in 0..42 {
        emitter.record(event(i, "org_1", 200));
    }
    emitter.close(Duration::from_secs(5)).await?;

    assert_eq!(sink.events().len(), 42);
    assert_eq!(sink.flushes(), 1);
    assert!(emitter.is_closed());
    assert!(!emitter.record(event(99, "org_1", 200)));
    assert_eq!(emitter.stats().dropped, 1);

    // second close is a no-op
    emitter.close(Duration::from_secs(5)).await?;
    assert_eq!(sink.flushes(), 1);
    Ok(())
}

#[tokio::test]
async fn events_keep_arrival_order_per_organization() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    let emitter = start(&sink, &usage_config(1000, 7));

    for i in 0..30 {
        let org = if i % 3 == 0 { "org_a" } else { "org_b" };
        emitter.record(event(i, org, 200));
    }
    emitter.close(Duration::from_secs(5)).await?;

    let events = sink.events();
    assert_eq!(events.len(), 30);
    for org in ["org_a", "org_b"] {
        let ids: Vec<usize> = events
            .iter()
            .filter(|e| e.organization_id == org)
            .filter_map(|e| e.request_id.strip_prefix("req-")?.parse().ok())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "{org} events out of order");
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_publish_is_retried() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(1);
    let emitter = start(&sink, &usage_config(1000, 5));

    for i in 0..5 {
        emitter.record(event(i, "org_1", 200));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.events().len(), 5);
    let stats = emitter.stats();
    assert_eq!(stats.published, 5);
    assert_eq!(stats.failed, 0);
    emitter.close(Duration::from_secs(1)).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn batch_is_dropped_after_retries_run_out() -> TestResult {
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(3);
    let emitter = start(&sink, &usage_config(1000, 5));

    for i in 0..5 {
        emitter.record(event(i, "org_1", 200));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(emitter.stats().failed, 5);
    assert!(sink.batches().is_empty());

    // the pipeline keeps working afterwards
    for i in 5..10 {
        emitter.record(event(i, "org_1", 200));
    }
    emitter.close(Duration::from_secs(1)).await?;
    assert_eq!(sink.events().len(), 5);
    Ok(())
}
