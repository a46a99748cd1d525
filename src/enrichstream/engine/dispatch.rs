//! Batch dispatch with retry and dead-letter degradation
//!
//! Sends sealed batches to the inference boundary. Transient failures are
//! retried at batch granularity with exponential backoff inside a
//! dispatch-level deadline; on exhaustion the batch degrades to per-record
//! dead-letter entries so one poisoned batch never silently discards its
//! records. An acknowledged batch is never redispatched.
//!
//! Partial-batch failure reporting from the sink is honored: individually
//! rejected records are dead-lettered with their own reasons while accepted
//! siblings count as dispatched.

use crate::enrichstream::boundary::{DeadLetterSink, DispatchResponse, InferenceSink};
use crate::enrichstream::engine::retry::BackoffPolicy;
use crate::enrichstream::error::EngineError;
use crate::enrichstream::metrics::PipelineMetrics;
use crate::enrichstream::types::{Batch, DeadLetterEntry, FailureReason};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};

/// Configuration for batch dispatch
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Timeout for a single submission attempt
    pub submit_timeout: Duration,
    /// Retry schedule for transient sink failures
    pub backoff: BackoffPolicy,
    /// Total deadline for one batch across all attempts
    pub dispatch_deadline: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_millis(500),
            backoff: BackoffPolicy {
                max_attempts: 4,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(1),
                jitter: true,
            },
            dispatch_deadline: Duration::from_secs(5),
        }
    }
}

/// How a batch left the dispatch controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every record was accepted by the sink
    Acked { records: usize, attempts: u32 },
    /// Some records were accepted, the rest dead-lettered
    Partial {
        acked: usize,
        dead_lettered: usize,
        attempts: u32,
    },
    /// All records were dead-lettered after retry exhaustion
    DeadLettered { records: usize, attempts: u32 },
}

/// Dispatch and retry controller for one partition
///
/// Shares a global concurrency cap with all other partitions so aggregate
/// submissions cannot overload the inference boundary.
pub struct DispatchController {
    sink: Arc<dyn InferenceSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: DispatchConfig,
    global_permits: Arc<Semaphore>,
    metrics: Arc<PipelineMetrics>,
}

impl DispatchController {
    /// Create a controller for one partition
    pub fn new(
        sink: Arc<dyn InferenceSink>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: DispatchConfig,
        global_permits: Arc<Semaphore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            dead_letters,
            config,
            global_permits,
            metrics,
        }
    }

    /// Dispatch a sealed batch: ack, partially ack, or dead-letter it.
    ///
    /// Exactly-once-effective from the caller's perspective: the batch is
    /// consumed, and each record ends in exactly one of the sink or the
    /// dead-letter sink.
    pub async fn dispatch(&self, batch: Batch) -> DispatchOutcome {
        let deadline = Instant::now() + self.config.dispatch_deadline;
        let mut attempts = 0u32;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let attempt_timeout = self.config.submit_timeout.min(remaining);

            let permit = match self.global_permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    last_error = "dispatch permits closed".to_string();
                    break;
                }
            };
            let result = timeout(attempt_timeout, self.sink.submit(&batch)).await;
            drop(permit);

            match result {
                Ok(Ok(DispatchResponse::Accepted)) => {
                    debug!(
                        "Partition {}: batch {} acked ({} records, attempt {})",
                        batch.partition_id,
                        batch.id,
                        batch.len(),
                        attempts
                    );
                    self.metrics.record_batch_acked(batch.len() as u64);
                    return DispatchOutcome::Acked {
                        records: batch.len(),
                        attempts,
                    };
                }
                Ok(Ok(DispatchResponse::PartialFailure { failures })) => {
                    return self.handle_partial(batch, failures, attempts).await;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!("submit timed out after {:?}", attempt_timeout);
                }
            }

            if !self.config.backoff.allows_retry(attempts) {
                break;
            }
            let delay = self.config.backoff.delay_for(attempts);
            if delay >= deadline.saturating_duration_since(Instant::now()) {
                break;
            }
            self.metrics.record_dispatch_retry();
            warn!(
                "Partition {}: batch {} dispatch failed (attempt {}): {}. Retrying in {:?}",
                batch.partition_id, batch.id, attempts, last_error, delay
            );
            tokio::time::sleep(delay).await;
        }

        self.dead_letter_all(batch, attempts, &last_error).await
    }

    /// Individually dead-letter sink-rejected records, ack the rest.
    async fn handle_partial(
        &self,
        batch: Batch,
        failures: Vec<crate::enrichstream::boundary::RecordFailure>,
        attempts: u32,
    ) -> DispatchOutcome {
        let total = batch.len();
        let mut rejected = vec![None::<String>; total];
        for failure in failures {
            if failure.index < total {
                rejected[failure.index] = Some(failure.reason);
            }
        }

        let mut dead_lettered = 0usize;
        for (record, reason) in batch.records.into_iter().zip(rejected.into_iter()) {
            if let Some(reason) = reason {
                self.dead_letters
                    .append(DeadLetterEntry {
                        event: record.event,
                        reason: FailureReason::DispatchRejected,
                        attempts,
                        last_error: reason,
                        failed_at: chrono::Utc::now(),
                    })
                    .await;
                dead_lettered += 1;
            }
        }

        let acked = total - dead_lettered;
        warn!(
            "Partition {}: batch {} partially failed: {} acked, {} dead-lettered",
            batch.partition_id, batch.id, acked, dead_lettered
        );
        self.metrics.record_batch_acked(acked as u64);
        self.metrics.record_dead_letters(dead_lettered as u64);
        DispatchOutcome::Partial {
            acked,
            dead_lettered,
            attempts,
        }
    }

    /// Degrade an exhausted batch to per-record dead-letter entries.
    ///
    /// Each record gets its own entry and reason rather than discarding the
    /// whole batch in one opaque failure.
    async fn dead_letter_all(
        &self,
        batch: Batch,
        attempts: u32,
        last_error: &str,
    ) -> DispatchOutcome {
        let records = batch.len();
        let failure = EngineError::dispatch_failed(last_error, attempts);
        error!(
            "Partition {}: batch {} dead-lettering {} records: {}",
            batch.partition_id, batch.id, records, failure
        );

        for record in batch.records {
            self.dead_letters
                .append(DeadLetterEntry::exhausted(
                    record.event,
                    attempts,
                    failure.to_string(),
                ))
                .await;
        }
        self.metrics.record_dead_letters(records as u64);

        DispatchOutcome::DeadLettered { records, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichstream::boundary::{
        BoundaryError, CollectingInferenceSink, RecordFailure,
    };
    use crate::enrichstream::engine::dead_letter::DeadLetterQueue;
    use crate::enrichstream::types::{EnrichedRecord, Event, FeatureSet, FlushReason, LookupResult};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(id: &str) -> EnrichedRecord {
        EnrichedRecord {
            event: Event::new(id, "u1", Utc.timestamp_millis_opt(1_000).unwrap()),
            features: FeatureSet {
                hour_of_day: 0,
                day_of_week: 0,
                session_duration_ms: 0,
                session_event_count: 1,
                aggregates: HashMap::new(),
            },
            lookup: LookupResult::missing(),
        }
    }

    fn batch(ids: &[&str]) -> Batch {
        let now = Instant::now();
        Batch {
            id: 0,
            partition_id: 0,
            records: ids.iter().map(|id| record(id)).collect(),
            created_at: now,
            deadline: now + Duration::from_millis(500),
            flush_reason: FlushReason::Size,
        }
    }

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            submit_timeout: Duration::from_millis(50),
            backoff: BackoffPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            dispatch_deadline: Duration::from_millis(500),
        }
    }

    fn controller(
        sink: Arc<dyn InferenceSink>,
        dlq: Arc<DeadLetterQueue>,
    ) -> DispatchController {
        DispatchController::new(
            sink,
            dlq,
            test_config(),
            Arc::new(Semaphore::new(8)),
            Arc::new(PipelineMetrics::new(0)),
        )
    }

    /// Sink that fails a fixed number of submissions before accepting.
    struct FlakySink {
        inner: CollectingInferenceSink,
        failures_remaining: AtomicU32,
        submissions: AtomicU32,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                inner: CollectingInferenceSink::new(),
                failures_remaining: AtomicU32::new(failures),
                submissions: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl InferenceSink for FlakySink {
        async fn submit(&self, batch: &Batch) -> Result<DispatchResponse, BoundaryError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err("inference boundary unavailable".into());
            }
            self.inner.submit(batch).await
        }
    }

    /// Sink that rejects the record at a fixed index.
    struct RejectingSink {
        reject_index: usize,
    }

    #[async_trait]
    impl InferenceSink for RejectingSink {
        async fn submit(&self, _batch: &Batch) -> Result<DispatchResponse, BoundaryError> {
            Ok(DispatchResponse::PartialFailure {
                failures: vec![RecordFailure {
                    index: self.reject_index,
                    reason: "schema mismatch".to_string(),
                }],
            })
        }
    }

    #[tokio::test]
    async fn test_ack_on_first_attempt() {
        let sink = Arc::new(CollectingInferenceSink::new());
        let dlq = Arc::new(DeadLetterQueue::new());
        let controller = controller(sink.clone(), dlq.clone());

        let outcome = controller.dispatch(batch(&["e1", "e2"])).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Acked {
                records: 2,
                attempts: 1
            }
        );
        assert_eq!(sink.accepted_records().await, 2);
        assert!(dlq.is_empty().await);
    }

    #[tokio::test]
    async fn test_fail_twice_then_ack_exactly_once() {
        // The downstream boundary must see exactly one successful
        // submission and zero dead letters.
        let sink = Arc::new(FlakySink::new(2));
        let dlq = Arc::new(DeadLetterQueue::new());
        let controller = controller(sink.clone(), dlq.clone());

        let outcome = controller.dispatch(batch(&["e1", "e2", "e3"])).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Acked {
                records: 3,
                attempts: 3
            }
        );
        assert_eq!(sink.inner.accepted_batches().await.len(), 1);
        assert_eq!(sink.submissions.load(Ordering::SeqCst), 3);
        assert!(dlq.is_empty().await);
    }

    #[tokio::test]
    async fn test_exhaustion_dead_letters_each_record() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let dlq = Arc::new(DeadLetterQueue::new());
        let controller = controller(sink, dlq.clone());

        let outcome = controller.dispatch(batch(&["e1", "e2"])).await;
        assert_eq!(
            outcome,
            DispatchOutcome::DeadLettered {
                records: 2,
                attempts: 3
            }
        );

        let entries = dlq.entries().await;
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.reason, FailureReason::DispatchExhausted);
            assert_eq!(entry.attempts, 3);
            assert_eq!(
                entry.last_error,
                "Dispatch failed after 3 attempts: inference boundary unavailable"
            );
        }
    }

    #[tokio::test]
    async fn test_partial_failure_splits_batch() {
        let sink = Arc::new(RejectingSink { reject_index: 1 });
        let dlq = Arc::new(DeadLetterQueue::new());
        let controller = controller(sink, dlq.clone());

        let outcome = controller.dispatch(batch(&["e1", "e2", "e3"])).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Partial {
                acked: 2,
                dead_lettered: 1,
                attempts: 1
            }
        );

        let entries = dlq.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.event_id, "e2");
        assert_eq!(entries[0].reason, FailureReason::DispatchRejected);
        assert_eq!(entries[0].last_error, "schema mismatch");
    }
}
