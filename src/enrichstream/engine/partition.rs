//! Partition runner: one partition end-to-end
//!
//! The unit of concurrency and failure isolation. Each runner owns its
//! watermark tracker, session store, enrichment client, batcher, and
//! dispatch controller; no state is shared with other partitions.
//!
//! Within the partition, state and watermark updates are strictly
//! sequential in arrival order, while enrichment lookups run concurrently
//! downstream of the state update. Per-event ordering into the batcher is
//! preserved by completing lookups through a FIFO handle queue: a lookup for
//! event N never overtakes the record for event N-1. The flush stage keeps
//! at most one handle in flight and selects it against the batch deadline,
//! so a slow lookup never delays the deadline flush of already-appended
//! records.
//!
//! Session eviction runs on a timer tick rather than per event, so an idle
//! partition still reclaims expired sessions.
//!
//! Shutdown is deterministic: when the ingest channel closes, the runner
//! drains in-flight lookups, flushes the open batch, and dispatches or
//! dead-letters it before exiting. No batch is silently discarded.

use crate::enrichstream::boundary::DeadLetterSink;
use crate::enrichstream::engine::batcher::{AppendOutcome, DeadlineBatcher};
use crate::enrichstream::engine::dispatch::DispatchController;
use crate::enrichstream::engine::enrichment::EnrichmentClient;
use crate::enrichstream::engine::features;
use crate::enrichstream::engine::session::{SessionStore, UpsertOutcome};
use crate::enrichstream::engine::watermark::WatermarkTracker;
use crate::enrichstream::error::EngineError;
use crate::enrichstream::metrics::PipelineMetrics;
use crate::enrichstream::types::{
    DeadLetterEntry, EnrichedRecord, Event, FailureReason, FlushReason,
};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// An in-flight enrichment: the spawned lookup task plus a copy of the
/// event so a failed task can still be dead-lettered.
type InFlight = (Event, JoinHandle<EnrichedRecord>);

/// One partition's end-to-end pipeline
pub struct PartitionRunner {
    partition_id: usize,
    watermark: Arc<WatermarkTracker>,
    sessions: SessionStore,
    enrichment: Arc<EnrichmentClient>,
    batcher: DeadlineBatcher,
    dispatcher: Arc<DispatchController>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<PipelineMetrics>,
    /// Bound on queued enrichment handles between ingest and batching
    enrich_queue_depth: usize,
}

impl PartitionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition_id: usize,
        watermark: Arc<WatermarkTracker>,
        sessions: SessionStore,
        enrichment: Arc<EnrichmentClient>,
        batcher: DeadlineBatcher,
        dispatcher: Arc<DispatchController>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<PipelineMetrics>,
        enrich_queue_depth: usize,
    ) -> Self {
        Self {
            partition_id,
            watermark,
            sessions,
            enrichment,
            batcher,
            dispatcher,
            dead_letters,
            metrics,
            enrich_queue_depth: enrich_queue_depth.max(1),
        }
    }

    /// Run the partition until its ingest channel closes, then drain.
    pub async fn run(self, events: mpsc::Receiver<Event>) {
        let partition_id = self.partition_id;
        info!("Partition {}: runner starting", partition_id);

        let (record_tx, record_rx) = mpsc::channel::<InFlight>(self.enrich_queue_depth);

        let ingest = ingest_loop(
            partition_id,
            events,
            self.watermark,
            self.sessions,
            self.enrichment,
            Arc::clone(&self.dead_letters),
            Arc::clone(&self.metrics),
            record_tx,
        );
        let flush = flush_loop(
            partition_id,
            record_rx,
            self.batcher,
            self.dispatcher,
            self.dead_letters,
            self.metrics,
        );

        tokio::join!(ingest, flush);
        info!("Partition {}: runner stopped", partition_id);
    }
}

/// Sequential per-event stage: validate, watermark, dedup, upsert, features.
///
/// Spawns one lookup task per surviving event and forwards the handle in
/// arrival order; the bounded handle channel provides backpressure against
/// a slow enrichment or dispatch stage. Expired sessions are swept on a
/// timer so eviction does not depend on fresh arrivals.
#[allow(clippy::too_many_arguments)]
async fn ingest_loop(
    partition_id: usize,
    mut events: mpsc::Receiver<Event>,
    watermark: Arc<WatermarkTracker>,
    mut sessions: SessionStore,
    enrichment: Arc<EnrichmentClient>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<PipelineMetrics>,
    record_tx: mpsc::Sender<InFlight>,
) {
    let mut sweep = tokio::time::interval(sessions.eviction_interval());
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                metrics.record_ingested();

                // Validation runs before any state update; malformed events
                // never touch the session store.
                if let Err(message) = validate(&event) {
                    metrics.record_malformed();
                    let failure =
                        EngineError::malformed(message, Some(event.event_id.clone()));
                    dead_letters
                        .append(DeadLetterEntry::rejected(
                            event,
                            FailureReason::Malformed,
                            failure.to_string(),
                        ))
                        .await;
                    continue;
                }

                let watermark_ms = watermark.observe(event.event_time);
                metrics.set_watermark_lag_ms(watermark.lag_ms());

                if watermark.is_late(event.event_time) {
                    metrics.record_late();
                    let failure = EngineError::late(
                        event.event_id.clone(),
                        event.event_time_ms(),
                        watermark_ms,
                    );
                    dead_letters
                        .append(DeadLetterEntry::rejected(
                            event,
                            FailureReason::LateArrival,
                            failure.to_string(),
                        ))
                        .await;
                    continue;
                }

                let session = match sessions.upsert(&event) {
                    UpsertOutcome::Applied(session) => session,
                    UpsertOutcome::Duplicate => {
                        // At-least-once transports redeliver; duplicates are
                        // normal and dropped without dead-lettering.
                        metrics.record_duplicate();
                        continue;
                    }
                };
                metrics.set_active_sessions(sessions.session_count());

                let feature_set = features::compute(&event, &session);
                let client = Arc::clone(&enrichment);
                let event_copy = event.clone();
                let handle = tokio::spawn(async move {
                    let lookup = client.lookup(&event.key).await;
                    EnrichedRecord {
                        event,
                        features: feature_set,
                        lookup,
                    }
                });

                if record_tx.send((event_copy, handle)).await.is_err() {
                    // Flush stage is gone; only happens on teardown.
                    break;
                }
            }
            _ = sweep.tick() => {
                let evicted = sessions.evict(watermark.current_watermark_ms());
                if !evicted.is_empty() {
                    debug!(
                        "Partition {}: evicted {} expired sessions",
                        partition_id,
                        evicted.len()
                    );
                    metrics.record_evicted(evicted.len() as u64);
                }
                metrics.set_active_sessions(sessions.session_count());
            }
        }
    }

    debug!("Partition {}: ingest channel closed", partition_id);
}

/// Batching stage: completes enrichment in order, seals batches on size or
/// deadline, and dispatches them.
///
/// Holds at most one handle in flight and selects it against the deadline
/// timer, so the timer stays pollable while a lookup completes.
async fn flush_loop(
    partition_id: usize,
    mut records: mpsc::Receiver<InFlight>,
    mut batcher: DeadlineBatcher,
    dispatcher: Arc<DispatchController>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<PipelineMetrics>,
) {
    let mut pending: Option<InFlight> = None;

    loop {
        let deadline = batcher.deadline();
        let deadline_elapsed = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            joined = join_pending(&mut pending) => {
                match joined {
                    Ok(record) => {
                        if batcher.append(record) == AppendOutcome::SizeReached {
                            flush(&mut batcher, &dispatcher, &metrics, FlushReason::Size).await;
                        }
                    }
                    Err((event, e)) => {
                        // A panicked or cancelled lookup task; the event is
                        // dead-lettered rather than silently dropped.
                        error!(
                            "Partition {}: enrichment task for event '{}' failed: {}",
                            partition_id, event.event_id, e
                        );
                        dead_letters
                            .append(DeadLetterEntry::rejected(
                                event,
                                FailureReason::EnrichmentFailed,
                                e.to_string(),
                            ))
                            .await;
                        metrics.record_dead_letters(1);
                    }
                }
            }
            next = records.recv(), if pending.is_none() => {
                match next {
                    Some(in_flight) => pending = Some(in_flight),
                    None => {
                        // Ingest is done and nothing is in flight: drain
                        // deterministically before exit.
                        flush(&mut batcher, &dispatcher, &metrics, FlushReason::Shutdown).await;
                        break;
                    }
                }
            }
            _ = deadline_elapsed => {
                flush(&mut batcher, &dispatcher, &metrics, FlushReason::Deadline).await;
            }
        }
    }

    debug!("Partition {}: flush loop stopped", partition_id);
}

/// Await the in-flight enrichment handle, or park forever if none is set.
///
/// Clears the slot on completion; cancellation-safe because the handle is
/// only taken once its task has finished.
async fn join_pending(
    pending: &mut Option<InFlight>,
) -> Result<EnrichedRecord, (Event, tokio::task::JoinError)> {
    if let Some((_, handle)) = pending.as_mut() {
        let result = handle.await;
        if let Some((event, _)) = pending.take() {
            return match result {
                Ok(record) => Ok(record),
                Err(e) => Err((event, e)),
            };
        }
    }
    std::future::pending().await
}

async fn flush(
    batcher: &mut DeadlineBatcher,
    dispatcher: &Arc<DispatchController>,
    metrics: &Arc<PipelineMetrics>,
    reason: FlushReason,
) {
    if let Some(batch) = batcher.take_batch(reason) {
        let fill_micros = batch.created_at.elapsed().as_micros() as u64;
        metrics.record_batch_flushed(reason == FlushReason::Deadline, fill_micros);
        dispatcher.dispatch(batch).await;
    }
}

fn validate(event: &Event) -> Result<(), String> {
    if event.key.trim().is_empty() {
        return Err("empty entity key".to_string());
    }
    if event.event_id.trim().is_empty() {
        return Err("empty event id".to_string());
    }
    Ok(())
}
