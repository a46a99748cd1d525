//! Prometheus metrics exporter for the enrichment engine
//!
//! Maps per-partition pipeline metrics onto a Prometheus registry for an
//! external metrics/alerting collector. Gauges are set from snapshots on
//! each `update`, so the exporter never touches the hot path.
//!
//! ## Metrics exposed
//!
//! - `enrichstream_partition_events_total{partition="N"}`
//! - `enrichstream_partition_watermark_lag_ms{partition="N"}`
//! - `enrichstream_partition_active_sessions{partition="N"}`
//! - `enrichstream_partition_lookups_fresh{partition="N"}` (plus stale/missing)
//! - `enrichstream_partition_batch_fill_micros{partition="N"}`
//! - `enrichstream_partition_dispatch_retries{partition="N"}`
//! - `enrichstream_partition_dead_letters{partition="N"}`
//! - `enrichstream_records_dispatched_total`, `enrichstream_dead_letters_total`

use crate::enrichstream::metrics::PipelineMetrics;
use prometheus::{IntGauge, Opts, Registry};
use std::sync::Arc;

/// Prometheus exporter over per-partition pipeline metrics
pub struct EnginePrometheusExporter {
    registry: Registry,

    partition_events: Vec<IntGauge>,
    partition_watermark_lag: Vec<IntGauge>,
    partition_active_sessions: Vec<IntGauge>,
    partition_lookups_fresh: Vec<IntGauge>,
    partition_lookups_stale: Vec<IntGauge>,
    partition_lookups_missing: Vec<IntGauge>,
    partition_batch_fill_micros: Vec<IntGauge>,
    partition_dispatch_retries: Vec<IntGauge>,
    partition_dead_letters: Vec<IntGauge>,

    records_dispatched_total: IntGauge,
    dead_letters_total: IntGauge,
}

impl EnginePrometheusExporter {
    /// Create an exporter with per-partition gauge families registered.
    pub fn new(num_partitions: usize) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let mut partition_events = Vec::with_capacity(num_partitions);
        let mut partition_watermark_lag = Vec::with_capacity(num_partitions);
        let mut partition_active_sessions = Vec::with_capacity(num_partitions);
        let mut partition_lookups_fresh = Vec::with_capacity(num_partitions);
        let mut partition_lookups_stale = Vec::with_capacity(num_partitions);
        let mut partition_lookups_missing = Vec::with_capacity(num_partitions);
        let mut partition_batch_fill_micros = Vec::with_capacity(num_partitions);
        let mut partition_dispatch_retries = Vec::with_capacity(num_partitions);
        let mut partition_dead_letters = Vec::with_capacity(num_partitions);

        for partition in 0..num_partitions {
            let label = partition.to_string();
            let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
                let gauge = IntGauge::with_opts(
                    Opts::new(name, help).const_label("partition", label.clone()),
                )?;
                registry.register(Box::new(gauge.clone()))?;
                Ok(gauge)
            };

            partition_events.push(gauge(
                "enrichstream_partition_events_total",
                "Events ingested by the partition",
            )?);
            partition_watermark_lag.push(gauge(
                "enrichstream_partition_watermark_lag_ms",
                "Lag between newest event time and watermark",
            )?);
            partition_active_sessions.push(gauge(
                "enrichstream_partition_active_sessions",
                "Currently open sessions",
            )?);
            partition_lookups_fresh.push(gauge(
                "enrichstream_partition_lookups_fresh",
                "Lookups answered fresh by the store",
            )?);
            partition_lookups_stale.push(gauge(
                "enrichstream_partition_lookups_stale",
                "Lookups served from the stale fallback cache",
            )?);
            partition_lookups_missing.push(gauge(
                "enrichstream_partition_lookups_missing",
                "Lookups resolved as missing",
            )?);
            partition_batch_fill_micros.push(gauge(
                "enrichstream_partition_batch_fill_micros",
                "Average batch fill time versus the latency budget",
            )?);
            partition_dispatch_retries.push(gauge(
                "enrichstream_partition_dispatch_retries",
                "Batch dispatch retry count",
            )?);
            partition_dead_letters.push(gauge(
                "enrichstream_partition_dead_letters",
                "Dead-letter entries written by the partition",
            )?);
        }

        let records_dispatched_total = IntGauge::with_opts(Opts::new(
            "enrichstream_records_dispatched_total",
            "Records accepted by the inference boundary across all partitions",
        ))?;
        registry.register(Box::new(records_dispatched_total.clone()))?;

        let dead_letters_total = IntGauge::with_opts(Opts::new(
            "enrichstream_dead_letters_total",
            "Dead-letter entries across all partitions",
        ))?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        Ok(Self {
            registry,
            partition_events,
            partition_watermark_lag,
            partition_active_sessions,
            partition_lookups_fresh,
            partition_lookups_stale,
            partition_lookups_missing,
            partition_batch_fill_micros,
            partition_dispatch_retries,
            partition_dead_letters,
            records_dispatched_total,
            dead_letters_total,
        })
    }

    /// Refresh all gauges from current metric snapshots.
    pub fn update(&self, metrics: &[Arc<PipelineMetrics>]) {
        let mut dispatched_total = 0i64;
        let mut dead_total = 0i64;

        for m in metrics {
            let s = m.snapshot();
            let p = s.partition_id;
            if p >= self.partition_events.len() {
                continue;
            }
            self.partition_events[p].set(s.events_ingested as i64);
            self.partition_watermark_lag[p].set(s.watermark_lag_ms);
            self.partition_active_sessions[p].set(s.active_sessions as i64);
            self.partition_lookups_fresh[p].set(s.lookups_fresh as i64);
            self.partition_lookups_stale[p].set(s.lookups_stale as i64);
            self.partition_lookups_missing[p].set(s.lookups_missing as i64);
            self.partition_batch_fill_micros[p].set(s.avg_batch_fill_micros as i64);
            self.partition_dispatch_retries[p].set(s.dispatch_retries as i64);
            self.partition_dead_letters[p].set(s.dead_letters as i64);

            dispatched_total += s.records_dispatched as i64;
            dead_total += s.dead_letters as i64;
        }

        self.records_dispatched_total.set(dispatched_total);
        self.dead_letters_total.set(dead_total);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
