//! Enrichment client for external lookups
//!
//! Attaches auxiliary fields to feature records via the external lookup
//! store. Lookups are timeout-bounded, retried with exponential backoff only
//! while the record's remaining latency budget permits, and degrade to a
//! locally cached stale value or an explicit missing marker. An enrichment
//! failure never blocks the pipeline and never drops a record.
//!
//! Concurrency is capped twice: a per-partition permit limit keeps one
//! partition from monopolizing the store, and a global cross-partition
//! semaphore protects the store from aggregate overload.

use crate::enrichstream::boundary::LookupStore;
use crate::enrichstream::engine::retry::BackoffPolicy;
use crate::enrichstream::error::EngineError;
use crate::enrichstream::metrics::PipelineMetrics;
use crate::enrichstream::types::LookupResult;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{timeout, Instant};

/// Configuration for enrichment lookups
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Timeout for a single lookup attempt; must sit well under the batch
    /// latency budget
    pub lookup_timeout: Duration,
    /// Retry schedule for transient lookup failures
    pub backoff: BackoffPolicy,
    /// Maximum in-flight lookups per partition
    pub max_in_flight: usize,
    /// Total latency budget for one record's enrichment, retries included
    pub record_budget: Duration,
    /// Maximum entries in the local stale-value fallback cache
    pub stale_cache_size: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_millis(50),
            backoff: BackoffPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                jitter: true,
            },
            max_in_flight: 32,
            record_budget: Duration::from_millis(250),
            stale_cache_size: 10_000,
        }
    }
}

/// Bounded-concurrency lookup client with stale/missing fallback
///
/// One client per partition; the global semaphore is shared across all
/// partitions by the coordinator.
pub struct EnrichmentClient {
    store: Arc<dyn LookupStore>,
    config: EnrichmentConfig,
    local_permits: Arc<Semaphore>,
    global_permits: Arc<Semaphore>,
    stale_cache: RwLock<HashMap<String, serde_json::Value>>,
    metrics: Arc<PipelineMetrics>,
}

impl EnrichmentClient {
    /// Create a client for one partition.
    ///
    /// `global_permits` is shared across partitions to cap aggregate load on
    /// the external store.
    pub fn new(
        store: Arc<dyn LookupStore>,
        config: EnrichmentConfig,
        global_permits: Arc<Semaphore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let local_permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            store,
            config,
            local_permits,
            global_permits,
            stale_cache: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Look up the value for a key within the record's enrichment budget.
    ///
    /// Always returns a result: `Fresh` from the store, `Stale` from the
    /// local cache after exhaustion, or `Missing` with a null placeholder.
    pub async fn lookup(&self, key: &str) -> LookupResult {
        // Permits bound in-flight lookups; acquire failures only happen on
        // semaphore close, which means shutdown - degrade, don't block.
        let _local = match self.local_permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.fallback(key, "partition permits closed").await,
        };
        let _global = match self.global_permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.fallback(key, "global permits closed").await,
        };

        let deadline = Instant::now() + self.config.record_budget;
        let mut attempts = 0u32;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let attempt_timeout = self.config.lookup_timeout.min(remaining);

            match timeout(attempt_timeout, self.store.get(key)).await {
                Ok(Ok(Some(value))) => {
                    self.remember(key, value.clone()).await;
                    self.metrics.record_lookup_fresh();
                    return LookupResult::fresh(value);
                }
                Ok(Ok(None)) => {
                    // Not-found is an authoritative answer, not a failure.
                    self.metrics.record_lookup_missing();
                    return LookupResult::missing();
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!("lookup timed out after {:?}", attempt_timeout);
                }
            }

            if !self.config.backoff.allows_retry(attempts) {
                break;
            }
            let delay = self.config.backoff.delay_for(attempts);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay >= remaining {
                // Short-circuit: no budget left for another attempt.
                break;
            }
            self.metrics.record_lookup_retry();
            debug!(
                "Lookup for key '{}' failed (attempt {}): {}. Retrying in {:?}",
                key, attempts, last_error, delay
            );
            tokio::time::sleep(delay).await;
        }

        self.fallback(key, &last_error).await
    }

    /// Serve the last known cached value as stale, or missing if none exists.
    async fn fallback(&self, key: &str, last_error: &str) -> LookupResult {
        let failure = EngineError::lookup_failed(key, last_error);
        if let Some(cached) = self.stale_cache.read().await.get(key).cloned() {
            warn!("{}; serving stale cached value", failure);
            self.metrics.record_lookup_stale();
            return LookupResult::stale(cached);
        }

        warn!("{}; no cached value, marking missing", failure);
        self.metrics.record_lookup_missing();
        LookupResult::missing()
    }

    async fn remember(&self, key: &str, value: serde_json::Value) {
        let mut cache = self.stale_cache.write().await;
        if cache.len() >= self.config.stale_cache_size && !cache.contains_key(key) {
            // Evict an arbitrary entry to stay bounded; the cache is a
            // best-effort fallback, not a source of truth.
            if let Some(evict) = cache.keys().next().cloned() {
                cache.remove(&evict);
            }
        }
        cache.insert(key.to_string(), value);
    }

    /// Number of entries in the stale-value fallback cache.
    pub async fn cached_entries(&self) -> usize {
        self.stale_cache.read().await.len()
    }
}
