//! External boundary abstractions
//!
//! The engine touches the outside world through three traits: the read-only
//! enrichment lookup store, the batched inference sink, and the append-only
//! dead-letter sink. Every boundary is async with explicit timeouts applied
//! by the caller, so no boundary call can block a partition indefinitely.
//!
//! In-memory implementations live alongside the traits; they back the demo
//! binary and the test suite.

use crate::enrichstream::types::{Batch, DeadLetterEntry, EnrichedRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::{Mutex, RwLock};

/// Boxed error type used across boundary traits
pub type BoundaryError = Box<dyn Error + Send + Sync>;

/// Read-only key/value lookup against the external enrichment store.
///
/// May return not-found or be unreachable; the enrichment client handles
/// timeouts, retries, and stale/missing fallbacks. The engine never writes
/// through this boundary.
#[async_trait]
pub trait LookupStore: Send + Sync + 'static {
    /// Fetch the value for a key, or None if the store has no entry.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, BoundaryError>;
}

/// Per-record failure reported by the inference boundary.
#[derive(Debug, Clone)]
pub struct RecordFailure {
    /// Index of the failed record within the submitted batch
    pub index: usize,
    /// Sink-supplied rejection reason
    pub reason: String,
}

/// Response from a batch submission.
#[derive(Debug, Clone)]
pub enum DispatchResponse {
    /// Every record in the batch was accepted
    Accepted,
    /// Some records were individually rejected; the rest were accepted
    PartialFailure { failures: Vec<RecordFailure> },
}

/// Batched submission boundary to the inference service.
///
/// A returned `Err` is transient (timeout, unavailable) and retried by the
/// dispatch controller. A `PartialFailure` response is authoritative: the
/// named records were rejected and will not be resubmitted.
#[async_trait]
pub trait InferenceSink: Send + Sync + 'static {
    /// Submit a sealed batch for inference.
    async fn submit(&self, batch: &Batch) -> Result<DispatchResponse, BoundaryError>;
}

/// Append-only dead-letter sink.
///
/// Writes must not fail the pipeline: implementations log and swallow their
/// own errors. The engine never reads entries back; replay and inspection
/// are an external tool's job.
#[async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    /// Append one terminal entry.
    async fn append(&self, entry: DeadLetterEntry);
}

/// In-memory lookup store backed by a shared map.
///
/// Used by the demo binary and tests; entries can be loaded up front or
/// inserted while the engine runs.
pub struct InMemoryLookupStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryLookupStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store pre-loaded with entries
    pub fn with_entries(entries: HashMap<String, serde_json::Value>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Insert or replace an entry
    pub async fn insert(&self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.write().await.insert(key.into(), value);
    }
}

impl Default for InMemoryLookupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LookupStore for InMemoryLookupStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, BoundaryError> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}

/// Inference sink that collects accepted batches in memory.
///
/// Records every accepted submission so tests and the demo binary can
/// inspect exactly what crossed the dispatch boundary.
pub struct CollectingInferenceSink {
    accepted: Mutex<Vec<Vec<EnrichedRecord>>>,
}

impl CollectingInferenceSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// All batches accepted so far, in submission order.
    pub async fn accepted_batches(&self) -> Vec<Vec<EnrichedRecord>> {
        self.accepted.lock().await.clone()
    }

    /// Total records across all accepted batches.
    pub async fn accepted_records(&self) -> usize {
        self.accepted.lock().await.iter().map(|b| b.len()).sum()
    }
}

impl Default for CollectingInferenceSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceSink for CollectingInferenceSink {
    async fn submit(&self, batch: &Batch) -> Result<DispatchResponse, BoundaryError> {
        self.accepted.lock().await.push(batch.records.clone());
        Ok(DispatchResponse::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lookup_store() {
        let store = InMemoryLookupStore::new();
        assert!(store.get("u1").await.unwrap().is_none());

        store.insert("u1", serde_json::json!({"tier": "gold"})).await;
        let value = store.get("u1").await.unwrap().unwrap();
        assert_eq!(value["tier"], "gold");
    }
}
