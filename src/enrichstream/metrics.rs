//! Lock-free pipeline metrics
//!
//! Each partition runner owns one `PipelineMetrics` instance updated with
//! relaxed atomics from the hot path; metrics readers (the Prometheus
//! exporter, the shutdown summary) take consistent-enough snapshots without
//! ever contending with ingest.
//!
//! Exposed signals: watermark lag, active session count, lookup
//! fresh/stale/miss rates, batch fill-time vs deadline, dispatch retry
//! counts, and dead-letter volume.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

/// Per-partition pipeline metrics (thread-safe)
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    partition_id: usize,

    // Ingest
    events_ingested: AtomicU64,
    events_malformed: AtomicU64,
    events_late: AtomicU64,
    events_duplicate: AtomicU64,

    // Session state
    active_sessions: AtomicUsize,
    sessions_evicted: AtomicU64,
    watermark_lag_ms: AtomicI64,

    // Enrichment
    lookups_fresh: AtomicU64,
    lookups_stale: AtomicU64,
    lookups_missing: AtomicU64,
    lookup_retries: AtomicU64,

    // Batching
    batches_size_flushed: AtomicU64,
    batches_deadline_flushed: AtomicU64,
    batch_fill_micros_total: AtomicU64,
    batches_flushed: AtomicU64,

    // Dispatch
    batches_acked: AtomicU64,
    records_dispatched: AtomicU64,
    dispatch_retries: AtomicU64,

    // Dead letters
    dead_letters: AtomicU64,
}

impl PipelineMetrics {
    /// Create a metrics tracker for a partition
    pub fn new(partition_id: usize) -> Self {
        Self {
            partition_id,
            ..Default::default()
        }
    }

    /// Get partition ID
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    pub fn record_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late(&self) {
        self.events_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.events_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.sessions_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_watermark_lag_ms(&self, lag: i64) {
        self.watermark_lag_ms.store(lag, Ordering::Relaxed);
    }

    pub fn record_lookup_fresh(&self) {
        self.lookups_fresh.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_stale(&self) {
        self.lookups_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_missing(&self) {
        self.lookups_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_retry(&self) {
        self.lookup_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sealed batch: which trigger fired and how long it filled.
    pub fn record_batch_flushed(&self, by_deadline: bool, fill_micros: u64) {
        if by_deadline {
            self.batches_deadline_flushed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_size_flushed.fetch_add(1, Ordering::Relaxed);
        }
        self.batch_fill_micros_total
            .fetch_add(fill_micros, Ordering::Relaxed);
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_acked(&self, records: u64) {
        self.batches_acked.fetch_add(1, Ordering::Relaxed);
        self.records_dispatched.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_dispatch_retry(&self) {
        self.dispatch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letters(&self, count: u64) {
        self.dead_letters.fetch_add(count, Ordering::Relaxed);
    }

    /// Average batch fill time in microseconds across all flushed batches.
    pub fn avg_batch_fill_micros(&self) -> u64 {
        let total = self.batch_fill_micros_total.load(Ordering::Relaxed);
        let count = self.batches_flushed.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            total / count
        }
    }

    /// Point-in-time snapshot of all counters and gauges.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            partition_id: self.partition_id,
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            events_late: self.events_late.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            watermark_lag_ms: self.watermark_lag_ms.load(Ordering::Relaxed),
            lookups_fresh: self.lookups_fresh.load(Ordering::Relaxed),
            lookups_stale: self.lookups_stale.load(Ordering::Relaxed),
            lookups_missing: self.lookups_missing.load(Ordering::Relaxed),
            lookup_retries: self.lookup_retries.load(Ordering::Relaxed),
            batches_size_flushed: self.batches_size_flushed.load(Ordering::Relaxed),
            batches_deadline_flushed: self.batches_deadline_flushed.load(Ordering::Relaxed),
            avg_batch_fill_micros: self.avg_batch_fill_micros(),
            batches_acked: self.batches_acked.load(Ordering::Relaxed),
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            dispatch_retries: self.dispatch_retries.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
        }
    }
}

/// Plain snapshot of one partition's metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub partition_id: usize,
    pub events_ingested: u64,
    pub events_malformed: u64,
    pub events_late: u64,
    pub events_duplicate: u64,
    pub active_sessions: usize,
    pub sessions_evicted: u64,
    pub watermark_lag_ms: i64,
    pub lookups_fresh: u64,
    pub lookups_stale: u64,
    pub lookups_missing: u64,
    pub lookup_retries: u64,
    pub batches_size_flushed: u64,
    pub batches_deadline_flushed: u64,
    pub avg_batch_fill_micros: u64,
    pub batches_acked: u64,
    pub records_dispatched: u64,
    pub dispatch_retries: u64,
    pub dead_letters: u64,
}

impl MetricsSnapshot {
    /// Sum per-partition snapshots into an engine-wide view.
    ///
    /// Gauges aggregate sensibly: session counts add, watermark lag takes
    /// the worst (highest) partition.
    pub fn aggregate(snapshots: &[MetricsSnapshot]) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for s in snapshots {
            total.events_ingested += s.events_ingested;
            total.events_malformed += s.events_malformed;
            total.events_late += s.events_late;
            total.events_duplicate += s.events_duplicate;
            total.active_sessions += s.active_sessions;
            total.sessions_evicted += s.sessions_evicted;
            total.watermark_lag_ms = total.watermark_lag_ms.max(s.watermark_lag_ms);
            total.lookups_fresh += s.lookups_fresh;
            total.lookups_stale += s.lookups_stale;
            total.lookups_missing += s.lookups_missing;
            total.lookup_retries += s.lookup_retries;
            total.batches_size_flushed += s.batches_size_flushed;
            total.batches_deadline_flushed += s.batches_deadline_flushed;
            total.batches_acked += s.batches_acked;
            total.records_dispatched += s.records_dispatched;
            total.dispatch_retries += s.dispatch_retries;
            total.dead_letters += s.dead_letters;
        }
        total
    }

    /// One-line human-readable summary for shutdown logging.
    pub fn format_summary(&self) -> String {
        format!(
            "ingested={} dispatched={} batches_acked={} late={} duplicates={} malformed={} \
             lookups(fresh/stale/miss)={}/{}/{} dispatch_retries={} dead_letters={} sessions={}",
            self.events_ingested,
            self.records_dispatched,
            self.batches_acked,
            self.events_late,
            self.events_duplicate,
            self.events_malformed,
            self.lookups_fresh,
            self.lookups_stale,
            self.lookups_missing,
            self.dispatch_retries,
            self.dead_letters,
            self.active_sessions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PipelineMetrics::new(2);
        metrics.record_ingested();
        metrics.record_ingested();
        metrics.record_lookup_fresh();
        metrics.record_dead_letters(3);
        metrics.set_active_sessions(5);
        metrics.set_watermark_lag_ms(120);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.partition_id, 2);
        assert_eq!(snapshot.events_ingested, 2);
        assert_eq!(snapshot.lookups_fresh, 1);
        assert_eq!(snapshot.dead_letters, 3);
        assert_eq!(snapshot.active_sessions, 5);
        assert_eq!(snapshot.watermark_lag_ms, 120);
    }

    #[test]
    fn test_avg_batch_fill() {
        let metrics = PipelineMetrics::new(0);
        assert_eq!(metrics.avg_batch_fill_micros(), 0);

        metrics.record_batch_flushed(false, 100);
        metrics.record_batch_flushed(true, 300);
        assert_eq!(metrics.avg_batch_fill_micros(), 200);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_size_flushed, 1);
        assert_eq!(snapshot.batches_deadline_flushed, 1);
    }

    #[test]
    fn test_aggregate() {
        let a = PipelineMetrics::new(0);
        let b = PipelineMetrics::new(1);
        a.record_ingested();
        b.record_ingested();
        b.record_ingested();
        a.set_watermark_lag_ms(50);
        b.set_watermark_lag_ms(200);

        let total = MetricsSnapshot::aggregate(&[a.snapshot(), b.snapshot()]);
        assert_eq!(total.events_ingested, 3);
        assert_eq!(total.watermark_lag_ms, 200);
    }
}
