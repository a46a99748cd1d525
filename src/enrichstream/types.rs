//! Core data types flowing through the enrichment pipeline
//!
//! Types are immutable once constructed: an `Event` never changes after it is
//! read from the transport, an `EnrichedRecord` never changes after the
//! enrichment stage builds it, and a `Batch` is sealed at flush time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

/// A raw event as delivered by the upstream transport.
///
/// `key` determines partition and session affinity. `event_id` is assigned by
/// the transport and, together with `event_time`, forms the deduplication
/// identity for at-least-once redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Transport-assigned event identifier (deduplication identity)
    pub event_id: String,
    /// Entity key (user/session identifier); determines partition affinity
    pub key: String,
    /// Event time in UTC
    pub event_time: DateTime<Utc>,
    /// Arbitrary event attributes; numeric attributes feed rolling aggregates
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create an event with no attributes (primarily for tests).
    pub fn new(
        event_id: impl Into<String>,
        key: impl Into<String>,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            key: key.into(),
            event_time,
            attributes: HashMap::new(),
        }
    }

    /// Event time in milliseconds since epoch.
    pub fn event_time_ms(&self) -> i64 {
        self.event_time.timestamp_millis()
    }
}

/// Derived time and session features for one event.
///
/// Produced by the feature computer from the event and its session state.
/// All time-derived fields are UTC-normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Hour of day [0, 23] from the event time, UTC
    pub hour_of_day: u32,
    /// Day of week [0 = Monday, 6 = Sunday] from the event time, UTC
    pub day_of_week: u32,
    /// Session duration in milliseconds (last_event_time - session_start)
    pub session_duration_ms: i64,
    /// Events observed in the session so far, including this one
    pub session_event_count: u64,
    /// Rolling per-attribute numeric sums for the session
    pub aggregates: HashMap<String, f64>,
}

/// Freshness of an enrichment lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupOutcome {
    /// Value returned by the lookup store within this record's budget
    Fresh,
    /// Lookup failed; value is the last known cached value for the key
    Stale,
    /// Lookup failed or returned not-found and no cached value exists
    Missing,
}

/// Result of an enrichment lookup, always present on an enriched record.
///
/// A `Missing` outcome carries a JSON null placeholder so downstream
/// consumers see a uniform shape regardless of lookup health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    /// Looked-up value, cached value, or JSON null
    pub value: serde_json::Value,
    /// Freshness of `value`
    pub outcome: LookupOutcome,
}

impl LookupResult {
    /// A fresh result straight from the lookup store.
    pub fn fresh(value: serde_json::Value) -> Self {
        Self {
            value,
            outcome: LookupOutcome::Fresh,
        }
    }

    /// A stale result served from the local fallback cache.
    pub fn stale(value: serde_json::Value) -> Self {
        Self {
            value,
            outcome: LookupOutcome::Stale,
        }
    }

    /// A missing result with the null placeholder.
    pub fn missing() -> Self {
        Self {
            value: serde_json::Value::Null,
            outcome: LookupOutcome::Missing,
        }
    }
}

/// A fully enriched, model-ready record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The original event
    pub event: Event,
    /// Derived time/session features
    pub features: FeatureSet,
    /// Enrichment lookup result (possibly stale or missing)
    pub lookup: LookupResult,
}

/// Why a batch was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached `max_batch_size`
    Size,
    /// The latency-budget deadline elapsed
    Deadline,
    /// The partition is shutting down and drained its open batch
    Shutdown,
}

/// An ordered group of enriched records for one partition.
///
/// Sealed (immutable) at flush time; owned by the dispatch controller until
/// acknowledged or dead-lettered.
#[derive(Debug)]
pub struct Batch {
    /// Monotonic per-partition batch sequence number
    pub id: u64,
    /// Partition that produced this batch
    pub partition_id: usize,
    /// Records in append order
    pub records: Vec<EnrichedRecord>,
    /// When the first record was appended
    pub created_at: Instant,
    /// created_at + latency_budget
    pub deadline: Instant,
    /// Which trigger sealed the batch
    pub flush_reason: FlushReason,
}

impl Batch {
    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Terminal classification for a dead-lettered event or record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Event arrived behind the partition watermark
    LateArrival,
    /// Event failed validation before any state update
    Malformed,
    /// Record's enrichment task died before producing a record
    EnrichmentFailed,
    /// Record's batch exhausted dispatch retries
    DispatchExhausted,
    /// Record was individually rejected by the inference boundary
    DispatchRejected,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::LateArrival => write!(f, "late_arrival"),
            FailureReason::Malformed => write!(f, "malformed"),
            FailureReason::EnrichmentFailed => write!(f, "enrichment_failed"),
            FailureReason::DispatchExhausted => write!(f, "dispatch_exhausted"),
            FailureReason::DispatchRejected => write!(f, "dispatch_rejected"),
        }
    }
}

/// A terminal record of a permanently failed or rejected event.
///
/// Written once to the dead-letter sink, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The original event
    pub event: Event,
    /// Failure classification
    pub reason: FailureReason,
    /// Number of processing attempts made (0 for pre-state rejections)
    pub attempts: u32,
    /// Description of the last error observed
    pub last_error: String,
    /// Wall-clock time the entry was written
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Build an entry for an event rejected before any processing attempt.
    pub fn rejected(event: Event, reason: FailureReason, last_error: impl Into<String>) -> Self {
        Self {
            event,
            reason,
            attempts: 0,
            last_error: last_error.into(),
            failed_at: Utc::now(),
        }
    }

    /// Build an entry for a record that exhausted dispatch attempts.
    pub fn exhausted(event: Event, attempts: u32, last_error: impl Into<String>) -> Self {
        Self {
            event,
            reason: FailureReason::DispatchExhausted,
            attempts,
            last_error: last_error.into(),
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_time_ms() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let event = Event::new("ev-1", "user-1", t);
        assert_eq!(event.event_time_ms(), 1_700_000_000_123);
    }

    #[test]
    fn test_event_json_round_trip() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut event = Event::new("ev-1", "user-1", t);
        event
            .attributes
            .insert("amount".to_string(), serde_json::json!(12.5));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_attributes_default() {
        // Transport payloads may omit attributes entirely
        let json = r#"{"event_id":"e1","key":"u1","event_time":"2024-01-15T10:30:00Z"}"#;
        let parsed: Event = serde_json::from_str(json).unwrap();
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn test_lookup_result_constructors() {
        assert_eq!(LookupResult::missing().outcome, LookupOutcome::Missing);
        assert_eq!(LookupResult::missing().value, serde_json::Value::Null);
        assert_eq!(
            LookupResult::fresh(serde_json::json!({"tier": "gold"})).outcome,
            LookupOutcome::Fresh
        );
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::LateArrival.to_string(), "late_arrival");
        assert_eq!(
            FailureReason::EnrichmentFailed.to_string(),
            "enrichment_failed"
        );
        assert_eq!(
            FailureReason::DispatchExhausted.to_string(),
            "dispatch_exhausted"
        );
    }
}
