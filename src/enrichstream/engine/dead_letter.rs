//! Bounded in-memory dead-letter queue
//!
//! Terminal destination for late, malformed, and dispatch-exhausted events.
//! Entries are written once and never mutated; the engine exposes no read
//! path beyond draining for offline inspection. Capacity is bounded: at
//! capacity the oldest entry is discarded so a dead-letter flood cannot
//! exhaust memory.

use crate::enrichstream::boundary::DeadLetterSink;
use crate::enrichstream::types::DeadLetterEntry;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Configuration for the in-memory dead-letter queue
#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    /// Maximum entries retained; oldest entries are discarded beyond this
    pub max_entries: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// In-memory append-only dead-letter queue
///
/// Shared across partitions behind an `Arc<dyn DeadLetterSink>`; writes are
/// serialized by the internal lock, which is uncontended in practice because
/// dead-lettering is the exception path.
pub struct DeadLetterQueue {
    entries: RwLock<VecDeque<DeadLetterEntry>>,
    config: DeadLetterConfig,
    total_entries: AtomicU64,
    discarded_entries: AtomicU64,
}

impl DeadLetterQueue {
    /// Create a queue with default configuration
    pub fn new() -> Self {
        Self::with_config(DeadLetterConfig::default())
    }

    /// Create a queue with custom configuration
    pub fn with_config(config: DeadLetterConfig) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            config,
            total_entries: AtomicU64::new(0),
            discarded_entries: AtomicU64::new(0),
        }
    }

    /// Total entries ever written, including discarded ones.
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }

    /// Entries discarded due to capacity.
    pub fn discarded_entries(&self) -> u64 {
        self.discarded_entries.load(Ordering::Relaxed)
    }

    /// Current queue depth.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the queue currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drain up to `count` oldest entries for offline inspection.
    pub async fn drain(&self, count: usize) -> Vec<DeadLetterEntry> {
        let mut entries = self.entries.write().await;
        let take = count.min(entries.len());
        entries.drain(0..take).collect()
    }

    /// Snapshot of all current entries without removing them.
    pub async fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().await.iter().cloned().collect()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
    async fn append(&self, entry: DeadLetterEntry) {
        debug!(
            "Dead-lettering event '{}' (key '{}'): {} - {}",
            entry.event.event_id, entry.event.key, entry.reason, entry.last_error
        );

        let mut entries = self.entries.write().await;
        if entries.len() >= self.config.max_entries {
            entries.pop_front();
            let discarded = self.discarded_entries.fetch_add(1, Ordering::Relaxed) + 1;
            if discarded == 1 || discarded % 1000 == 0 {
                warn!(
                    "Dead-letter queue at capacity ({}); discarded {} oldest entries",
                    self.config.max_entries, discarded
                );
            }
        }
        entries.push_back(entry);
        self.total_entries.fetch_add(1, Ordering::Relaxed);
    }
}
