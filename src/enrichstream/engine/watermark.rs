//! Watermark tracking for event-time processing
//!
//! Each partition maintains its own monotonic low-watermark derived from
//! observed event times. The watermark bounds how long session state stays
//! open and which late arrivals are rejected before they can touch state.
//!
//! Thread-safe via atomic operations so metrics readers never contend with
//! the ingest loop.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Configuration for watermark tracking
#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    /// Maximum out-of-orderness tolerated before an event is late.
    ///
    /// Clock skew beyond this bound marks events late even when they are
    /// recent in wall-clock terms. That is intentional: it is what bounds
    /// session state growth.
    pub allowed_lateness: Duration,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            allowed_lateness: Duration::from_secs(60),
        }
    }
}

/// Per-partition watermark tracker
///
/// Maintains `watermark = max(watermark, event_time - allowed_lateness)`,
/// clamped at zero so a stream whose earliest timestamps are smaller than
/// the lateness bound never produces a negative watermark. The watermark
/// never moves backward.
///
/// Pure and partition-local: no I/O, no cross-partition sharing.
pub struct WatermarkTracker {
    partition_id: usize,

    /// Current watermark (milliseconds since epoch), -1 until first event
    current_watermark: AtomicI64,

    /// Last event time observed (milliseconds since epoch), -1 until first event
    last_event_time: AtomicI64,

    config: WatermarkConfig,

    /// Count of events rejected as late
    late_events: AtomicI64,
}

impl WatermarkTracker {
    /// Create a new watermark tracker for a partition
    pub fn new(partition_id: usize, config: WatermarkConfig) -> Self {
        Self {
            partition_id,
            current_watermark: AtomicI64::new(-1),
            last_event_time: AtomicI64::new(-1),
            config,
            late_events: AtomicI64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(partition_id: usize) -> Self {
        Self::new(partition_id, WatermarkConfig::default())
    }

    /// Observe an event time and return the current watermark in millis.
    ///
    /// The watermark only ever advances; observing an older event time than
    /// any previously seen leaves it unchanged.
    pub fn observe(&self, event_time: DateTime<Utc>) -> i64 {
        let event_time_ms = event_time.timestamp_millis();
        self.last_event_time
            .fetch_max(event_time_ms, Ordering::Relaxed);

        let lateness_ms = self.config.allowed_lateness.as_millis() as i64;
        // Clamp at zero: never below stream start.
        let candidate = (event_time_ms - lateness_ms).max(0);

        let previous = self.current_watermark.fetch_max(candidate, Ordering::Relaxed);
        previous.max(candidate)
    }

    /// Whether an event time is behind the watermark.
    ///
    /// Returns false while no watermark has been established. Late events
    /// must never be used to update session state.
    pub fn is_late(&self, event_time: DateTime<Utc>) -> bool {
        let watermark = self.current_watermark.load(Ordering::Relaxed);
        if watermark < 0 {
            return false;
        }

        let late = event_time.timestamp_millis() < watermark;
        if late {
            self.late_events.fetch_add(1, Ordering::Relaxed);
        }
        late
    }

    /// Current watermark, or None until the first event is observed.
    pub fn current_watermark(&self) -> Option<DateTime<Utc>> {
        let watermark = self.current_watermark.load(Ordering::Relaxed);
        if watermark < 0 {
            None
        } else {
            DateTime::from_timestamp_millis(watermark)
        }
    }

    /// Current watermark in milliseconds since epoch, or -1 if unset.
    pub fn current_watermark_ms(&self) -> i64 {
        self.current_watermark.load(Ordering::Relaxed)
    }

    /// Lag between the newest observed event time and the watermark, in millis.
    ///
    /// Zero until a watermark is established. Feeds the watermark-lag gauge.
    pub fn lag_ms(&self) -> i64 {
        let watermark = self.current_watermark.load(Ordering::Relaxed);
        let last_event = self.last_event_time.load(Ordering::Relaxed);
        if watermark < 0 || last_event < 0 {
            0
        } else {
            (last_event - watermark).max(0)
        }
    }

    /// Count of events observed as late so far.
    pub fn late_events(&self) -> u64 {
        self.late_events.load(Ordering::Relaxed).max(0) as u64
    }

    /// Get partition ID
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_no_watermark_before_first_event() {
        let wm = WatermarkTracker::with_defaults(0);
        assert!(wm.current_watermark().is_none());
        assert!(!wm.is_late(at_ms(0)));
    }

    #[test]
    fn test_watermark_tracks_event_time_minus_lateness() {
        let config = WatermarkConfig {
            allowed_lateness: Duration::from_secs(10),
        };
        let wm = WatermarkTracker::new(0, config);

        let observed = wm.observe(at_ms(60_000));
        assert_eq!(observed, 50_000);
        assert_eq!(wm.current_watermark_ms(), 50_000);
    }

    #[test]
    fn test_watermark_monotonicity() {
        let config = WatermarkConfig {
            allowed_lateness: Duration::from_millis(500),
        };
        let wm = WatermarkTracker::new(0, config);

        // Arbitrary up-and-down sequence; watermark must never decrease.
        let times = [10_000i64, 12_000, 11_000, 9_500, 15_000, 14_999, 20_000];
        let mut previous = i64::MIN;
        for t in times {
            let observed = wm.observe(at_ms(t));
            assert!(observed >= previous, "watermark regressed at t={}", t);
            previous = observed;
        }
        assert_eq!(wm.current_watermark_ms(), 19_500);
    }

    #[test]
    fn test_watermark_clamped_at_stream_start() {
        // First events smaller than the lateness bound must not produce a
        // negative watermark.
        let config = WatermarkConfig {
            allowed_lateness: Duration::from_millis(500),
        };
        let wm = WatermarkTracker::new(0, config);

        wm.observe(at_ms(100));
        wm.observe(at_ms(140));
        wm.observe(at_ms(90));

        assert_eq!(wm.current_watermark_ms(), 0);
        // All three events were within the lateness bound.
        assert!(!wm.is_late(at_ms(90)));
        assert_eq!(wm.late_events(), 0);
    }

    #[test]
    fn test_late_event_detection() {
        let config = WatermarkConfig {
            allowed_lateness: Duration::from_secs(10),
        };
        let wm = WatermarkTracker::new(0, config);

        wm.observe(at_ms(60_000)); // watermark = 50_000

        assert!(wm.is_late(at_ms(49_999)));
        assert!(!wm.is_late(at_ms(50_000)));
        assert_eq!(wm.late_events(), 1);
    }

    #[test]
    fn test_lag_tracking() {
        let config = WatermarkConfig {
            allowed_lateness: Duration::from_secs(10),
        };
        let wm = WatermarkTracker::new(0, config);
        assert_eq!(wm.lag_ms(), 0);

        wm.observe(at_ms(60_000));
        // Lag equals allowed lateness while events keep arriving in order.
        assert_eq!(wm.lag_ms(), 10_000);
    }
}
