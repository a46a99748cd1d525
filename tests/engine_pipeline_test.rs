//! End-to-end pipeline tests across the full engine
//!
//! Exercises the coordinator, partition runners, and both external
//! boundaries together using in-memory and failure-injecting boundary
//! implementations.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use enrichstream::enrichstream::boundary::{
    BoundaryError, CollectingInferenceSink, DispatchResponse, InMemoryLookupStore, InferenceSink,
    LookupStore,
};
use enrichstream::enrichstream::engine::batcher::BatcherConfig;
use enrichstream::enrichstream::engine::dead_letter::DeadLetterQueue;
use enrichstream::enrichstream::engine::dispatch::DispatchConfig;
use enrichstream::enrichstream::engine::enrichment::EnrichmentConfig;
use enrichstream::enrichstream::engine::retry::BackoffPolicy;
use enrichstream::enrichstream::engine::watermark::WatermarkConfig;
use enrichstream::enrichstream::types::{Batch, LookupOutcome};
use enrichstream::{EngineConfig, EngineCoordinator, Event, FailureReason};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn event(id: &str, key: &str, ms: i64) -> Event {
    Event::new(id, key, Utc.timestamp_millis_opt(ms).unwrap())
}

fn fast_config(num_partitions: usize) -> EngineConfig {
    EngineConfig {
        num_partitions,
        watermark: WatermarkConfig {
            allowed_lateness: Duration::from_millis(500),
        },
        enrichment: EnrichmentConfig {
            lookup_timeout: Duration::from_millis(20),
            backoff: BackoffPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            record_budget: Duration::from_millis(100),
            ..Default::default()
        },
        batcher: BatcherConfig {
            max_batch_size: 8,
            latency_budget: Duration::from_millis(200),
        },
        dispatch: DispatchConfig {
            submit_timeout: Duration::from_millis(50),
            backoff: BackoffPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                jitter: false,
            },
            dispatch_deadline: Duration::from_millis(500),
        },
        ..Default::default()
    }
}

/// Lookup store that is unreachable for the whole test duration.
struct UnreachableStore;

#[async_trait]
impl LookupStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, BoundaryError> {
        Err("connection refused".into())
    }
}

/// Sink that fails a fixed number of submissions before accepting.
struct FlakySink {
    inner: CollectingInferenceSink,
    failures_remaining: AtomicU32,
    successes: AtomicU32,
}

impl FlakySink {
    fn new(failures: u32) -> Self {
        Self {
            inner: CollectingInferenceSink::new(),
            failures_remaining: AtomicU32::new(failures),
            successes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl InferenceSink for FlakySink {
    async fn submit(&self, batch: &Batch) -> Result<DispatchResponse, BoundaryError> {
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err("inference boundary timed out".into());
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(batch).await
    }
}

#[tokio::test]
async fn test_concrete_out_of_order_scenario() {
    // Events {U1, 100ms}, {U1, 140ms}, {U1, 90ms} arrive in that order,
    // out of order but within allowed_lateness = 500ms.
    let sink = Arc::new(CollectingInferenceSink::new());
    let dlq = Arc::new(DeadLetterQueue::new());
    let engine = EngineCoordinator::start(
        fast_config(1),
        Arc::new(InMemoryLookupStore::new()),
        sink.clone(),
        dlq.clone(),
    )
    .unwrap();

    engine.submit(event("e1", "U1", 100)).await.unwrap();
    engine.submit(event("e2", "U1", 140)).await.unwrap();
    engine.submit(event("e3", "U1", 90)).await.unwrap();

    let summary = engine.shutdown().await.unwrap();

    // One enriched record per event, none dead-lettered.
    assert_eq!(sink.accepted_records().await, 3);
    assert!(dlq.is_empty().await);
    assert_eq!(summary.events_late, 0);

    // The last record carries the full session picture:
    // count 3, start 90ms, last 140ms, duration 50ms.
    let batches = sink.accepted_batches().await;
    let records: Vec<_> = batches.into_iter().flatten().collect();
    let last = records
        .iter()
        .find(|r| r.event.event_id == "e3")
        .expect("record for e3");
    assert_eq!(last.features.session_event_count, 3);
    assert_eq!(last.features.session_duration_ms, 50);
}

#[tokio::test]
async fn test_unreachable_lookup_store_never_loses_records() {
    // With the lookup store down for the whole run, every input event must
    // still produce exactly one enriched record marked Missing - never
    // neither, never both.
    let sink = Arc::new(CollectingInferenceSink::new());
    let dlq = Arc::new(DeadLetterQueue::new());
    let engine = EngineCoordinator::start(
        fast_config(2),
        Arc::new(UnreachableStore),
        sink.clone(),
        dlq.clone(),
    )
    .unwrap();

    for i in 0..20i64 {
        engine
            .submit(event(&format!("e{}", i), &format!("u{}", i % 5), 1_000 + i * 10))
            .await
            .unwrap();
    }
    engine.shutdown().await.unwrap();

    assert_eq!(sink.accepted_records().await, 20);
    assert!(dlq.is_empty().await);

    for batch in sink.accepted_batches().await {
        for record in batch {
            assert_eq!(record.lookup.outcome, LookupOutcome::Missing);
            assert_eq!(record.lookup.value, serde_json::Value::Null);
        }
    }
}

#[tokio::test]
async fn test_dispatch_fail_twice_then_succeed_is_exactly_once_effective() {
    let sink = Arc::new(FlakySink::new(2));
    let dlq = Arc::new(DeadLetterQueue::new());
    let engine = EngineCoordinator::start(
        fast_config(1),
        Arc::new(InMemoryLookupStore::new()),
        sink.clone(),
        dlq.clone(),
    )
    .unwrap();

    for i in 0..8i64 {
        engine
            .submit(event(&format!("e{}", i), "u1", 1_000 + i))
            .await
            .unwrap();
    }
    engine.shutdown().await.unwrap();

    // Exactly one successful submission reached the boundary, and no
    // record from the batch was dead-lettered.
    assert_eq!(sink.successes.load(Ordering::SeqCst), 1);
    assert_eq!(sink.inner.accepted_records().await, 8);
    assert!(dlq.is_empty().await);
}

#[tokio::test]
async fn test_permanently_failing_dispatch_dead_letters_every_record() {
    let sink = Arc::new(FlakySink::new(u32::MAX));
    let dlq = Arc::new(DeadLetterQueue::new());
    let engine = EngineCoordinator::start(
        fast_config(1),
        Arc::new(InMemoryLookupStore::new()),
        sink.clone(),
        dlq.clone(),
    )
    .unwrap();

    for i in 0..8i64 {
        engine
            .submit(event(&format!("e{}", i), "u1", 1_000 + i))
            .await
            .unwrap();
    }
    let summary = engine.shutdown().await.unwrap();

    // Batch dispatched or dead-lettered exactly once, no silent drop: all
    // eight records appear in the dead-letter queue with their own entries.
    assert_eq!(sink.inner.accepted_records().await, 0);
    assert_eq!(dlq.len().await, 8);
    assert_eq!(summary.dead_letters, 8);
    for entry in dlq.entries().await {
        assert_eq!(entry.reason, FailureReason::DispatchExhausted);
        assert!(entry.attempts >= 1);
    }
}

#[tokio::test]
async fn test_deadline_flush_under_zero_throughput() {
    // A single record must be flushed by the timer within the latency
    // budget even when nothing else arrives.
    let sink = Arc::new(CollectingInferenceSink::new());
    let engine = EngineCoordinator::start(
        fast_config(1),
        Arc::new(InMemoryLookupStore::new()),
        sink.clone(),
        Arc::new(DeadLetterQueue::new()),
    )
    .unwrap();

    engine.submit(event("e1", "u1", 1_000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Flushed before shutdown: the timer, not the drain, delivered it.
    assert_eq!(sink.accepted_records().await, 1);
    let summary = engine.shutdown().await.unwrap();
    assert_eq!(summary.batches_deadline_flushed, 1);
}

#[tokio::test]
async fn test_fresh_lookup_values_attached() {
    let store = Arc::new(InMemoryLookupStore::new());
    store
        .insert("u1", serde_json::json!({"segment": "premium"}))
        .await;

    let sink = Arc::new(CollectingInferenceSink::new());
    let engine = EngineCoordinator::start(
        fast_config(1),
        store,
        sink.clone(),
        Arc::new(DeadLetterQueue::new()),
    )
    .unwrap();

    engine.submit(event("e1", "u1", 1_000)).await.unwrap();
    engine.shutdown().await.unwrap();

    let batches = sink.accepted_batches().await;
    let record = &batches[0][0];
    assert_eq!(record.lookup.outcome, LookupOutcome::Fresh);
    assert_eq!(record.lookup.value["segment"], "premium");
    assert_eq!(record.features.session_event_count, 1);
}
