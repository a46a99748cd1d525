//! Engine coordinator for multi-partition orchestration
//!
//! Owns one partition runner per source partition, routes events to them by
//! entity-key hash, and fans shutdown out so every runner drains before the
//! engine exits. Partitions share nothing mutable; the only cross-partition
//! coordination is the pair of global semaphores protecting the external
//! lookup store and the inference boundary from aggregate overload.

use crate::enrichstream::boundary::{DeadLetterSink, InferenceSink, LookupStore};
use crate::enrichstream::engine::batcher::{BatcherConfig, DeadlineBatcher};
use crate::enrichstream::engine::dispatch::{DispatchConfig, DispatchController};
use crate::enrichstream::engine::enrichment::{EnrichmentClient, EnrichmentConfig};
use crate::enrichstream::engine::partition::PartitionRunner;
use crate::enrichstream::engine::session::{SessionConfig, SessionStore};
use crate::enrichstream::engine::watermark::{WatermarkConfig, WatermarkTracker};
use crate::enrichstream::error::{EngineError, EngineResult};
use crate::enrichstream::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::enrichstream::types::Event;
use log::{info, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of partition runners (defaults to available parallelism)
    pub num_partitions: usize,
    /// Ingest channel capacity per partition
    pub partition_buffer_size: usize,
    /// Cross-partition cap on in-flight enrichment lookups
    pub global_lookup_concurrency: usize,
    /// Cross-partition cap on in-flight batch submissions
    pub global_dispatch_concurrency: usize,
    pub watermark: WatermarkConfig,
    pub session: SessionConfig,
    pub enrichment: EnrichmentConfig,
    pub batcher: BatcherConfig,
    pub dispatch: DispatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let num_partitions = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            num_partitions,
            partition_buffer_size: 1_000,
            global_lookup_concurrency: 128,
            global_dispatch_concurrency: 16,
            watermark: WatermarkConfig::default(),
            session: SessionConfig::default(),
            enrichment: EnrichmentConfig::default(),
            batcher: BatcherConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.num_partitions == 0 {
            return Err(EngineError::configuration("num_partitions must be > 0"));
        }
        if self.batcher.max_batch_size == 0 {
            return Err(EngineError::configuration("max_batch_size must be > 0"));
        }
        if self.enrichment.lookup_timeout >= self.batcher.latency_budget {
            return Err(EngineError::configuration(
                "lookup_timeout must sit well under the batch latency budget",
            ));
        }
        Ok(())
    }
}

/// Multi-partition enrichment engine
///
/// Entry point for the whole pipeline: `start` spawns the runners, `submit`
/// routes events, `shutdown` drains and joins every partition.
pub struct EngineCoordinator {
    num_partitions: usize,
    senders: Vec<mpsc::Sender<Event>>,
    handles: Vec<JoinHandle<()>>,
    metrics: Vec<Arc<PipelineMetrics>>,
}

impl EngineCoordinator {
    /// Validate configuration and spawn one runner task per partition.
    pub fn start(
        config: EngineConfig,
        lookup_store: Arc<dyn LookupStore>,
        inference_sink: Arc<dyn InferenceSink>,
        dead_letter_sink: Arc<dyn DeadLetterSink>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let global_lookup_permits =
            Arc::new(Semaphore::new(config.global_lookup_concurrency.max(1)));
        let global_dispatch_permits =
            Arc::new(Semaphore::new(config.global_dispatch_concurrency.max(1)));

        let mut senders = Vec::with_capacity(config.num_partitions);
        let mut handles = Vec::with_capacity(config.num_partitions);
        let mut metrics = Vec::with_capacity(config.num_partitions);

        for partition_id in 0..config.num_partitions {
            let partition_metrics = Arc::new(PipelineMetrics::new(partition_id));

            let watermark = Arc::new(WatermarkTracker::new(
                partition_id,
                config.watermark.clone(),
            ));
            let sessions = SessionStore::new(config.session.clone());
            let enrichment = Arc::new(EnrichmentClient::new(
                Arc::clone(&lookup_store),
                config.enrichment.clone(),
                Arc::clone(&global_lookup_permits),
                Arc::clone(&partition_metrics),
            ));
            let batcher = DeadlineBatcher::new(partition_id, config.batcher.clone());
            let dispatcher = Arc::new(DispatchController::new(
                Arc::clone(&inference_sink),
                Arc::clone(&dead_letter_sink),
                config.dispatch.clone(),
                Arc::clone(&global_dispatch_permits),
                Arc::clone(&partition_metrics),
            ));

            let runner = PartitionRunner::new(
                partition_id,
                watermark,
                sessions,
                enrichment,
                batcher,
                dispatcher,
                Arc::clone(&dead_letter_sink),
                Arc::clone(&partition_metrics),
                config.partition_buffer_size,
            );

            let (tx, rx) = mpsc::channel(config.partition_buffer_size.max(1));
            handles.push(tokio::spawn(runner.run(rx)));
            senders.push(tx);
            metrics.push(partition_metrics);
        }

        info!(
            "Engine started with {} partitions (lookup cap {}, dispatch cap {})",
            config.num_partitions,
            config.global_lookup_concurrency,
            config.global_dispatch_concurrency
        );

        Ok(Self {
            num_partitions: config.num_partitions,
            senders,
            handles,
            metrics,
        })
    }

    /// Partition an entity key routes to.
    ///
    /// Deterministic: all events for one key land on the same partition, so
    /// session state for a key is mutated by exactly one runner.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.num_partitions
    }

    /// Route an event to its partition runner.
    ///
    /// Applies backpressure: awaits channel capacity rather than dropping.
    pub async fn submit(&self, event: Event) -> EngineResult<()> {
        let partition = self.partition_for(&event.key);
        self.senders[partition].send(event).await.map_err(|_| {
            EngineError::resource_exhausted(
                format!("partition-{}", partition),
                "ingest channel closed",
            )
        })
    }

    /// Number of partition runners.
    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Per-partition metrics snapshots.
    pub fn partition_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.metrics.iter().map(|m| m.snapshot()).collect()
    }

    /// Engine-wide aggregated metrics snapshot.
    pub fn engine_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::aggregate(&self.partition_snapshots())
    }

    /// Shared handles to the per-partition metrics, for exporters.
    pub fn metrics_handles(&self) -> Vec<Arc<PipelineMetrics>> {
        self.metrics.iter().map(Arc::clone).collect()
    }

    /// Close ingest and wait for every partition to drain and exit.
    ///
    /// In-flight batches are either dispatched or dead-lettered before the
    /// runners return; nothing is silently discarded.
    pub async fn shutdown(mut self) -> EngineResult<MetricsSnapshot> {
        info!("Engine shutting down: draining {} partitions", self.num_partitions);
        self.senders.clear();

        for (partition_id, handle) in self.handles.drain(..).enumerate() {
            if let Err(e) = handle.await {
                warn!("Partition {}: runner task failed on join: {}", partition_id, e);
            }
        }

        let summary = MetricsSnapshot::aggregate(
            &self
                .metrics
                .iter()
                .map(|m| m.snapshot())
                .collect::<Vec<_>>(),
        );
        info!("Engine stopped: {}", summary.format_summary());
        Ok(summary)
    }
}
