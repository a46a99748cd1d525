//! Deadline-driven micro-batching
//!
//! Accumulates enriched records per partition and seals a batch when either
//! the size threshold or the latency-budget deadline is reached, whichever
//! fires first. The deadline clock starts at the first append after a flush,
//! not at flush completion, so worst-case per-record latency is bounded by
//! `latency_budget` regardless of arrival rate; a deadline flush fires even
//! with a single record present.
//!
//! The batcher itself is a passive state machine; the partition runner owns
//! the timer and calls `take_batch` when either trigger fires.

use crate::enrichstream::types::{Batch, EnrichedRecord, FlushReason};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for deadline batching
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Seal the batch as soon as it holds this many records
    pub max_batch_size: usize,
    /// Seal the batch this long after its first append
    pub latency_budget: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            latency_budget: Duration::from_millis(500),
        }
    }
}

/// Outcome of appending a record to the open batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record accepted; the batch is still collecting
    Collecting,
    /// Record accepted and the batch reached `max_batch_size`
    SizeReached,
}

/// Per-partition size-or-deadline batcher
///
/// State machine: `Collecting -> (size | deadline) -> Flushing -> Collecting`.
/// Exactly one trigger seals each batch; `take_batch` transitions back to
/// collecting with a fresh (empty, unarmed) state.
pub struct DeadlineBatcher {
    partition_id: usize,
    config: BatcherConfig,
    records: Vec<EnrichedRecord>,
    /// Set at the first append of each batch; None while empty
    opened_at: Option<Instant>,
    next_batch_id: u64,
}

impl DeadlineBatcher {
    /// Create a batcher for one partition
    pub fn new(partition_id: usize, config: BatcherConfig) -> Self {
        Self {
            partition_id,
            config,
            records: Vec::new(),
            opened_at: None,
            next_batch_id: 0,
        }
    }

    /// Append a record to the open batch, opening one if necessary.
    ///
    /// Returns `SizeReached` when the append fills the batch; the caller
    /// must then seal it with `take_batch(FlushReason::Size)`.
    pub fn append(&mut self, record: EnrichedRecord) -> AppendOutcome {
        if self.records.is_empty() {
            // Deadline clock starts at first append, not at flush completion.
            self.opened_at = Some(Instant::now());
        }
        self.records.push(record);

        if self.records.len() >= self.config.max_batch_size {
            AppendOutcome::SizeReached
        } else {
            AppendOutcome::Collecting
        }
    }

    /// Deadline of the open batch, or None while empty.
    ///
    /// The partition runner arms its flush timer on this instant.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.config.latency_budget)
    }

    /// Seal and return the open batch, or None if no records are buffered.
    pub fn take_batch(&mut self, reason: FlushReason) -> Option<Batch> {
        let opened_at = self.opened_at.take()?;
        if self.records.is_empty() {
            return None;
        }

        let records = std::mem::take(&mut self.records);
        let id = self.next_batch_id;
        self.next_batch_id += 1;

        Some(Batch {
            id,
            partition_id: self.partition_id,
            records,
            created_at: opened_at,
            deadline: opened_at + self.config.latency_budget,
            flush_reason: reason,
        })
    }

    /// Number of records in the open batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no batch is currently open.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
