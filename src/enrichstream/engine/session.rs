//! Partition-local session state store
//!
//! Holds per-entity session aggregates, owned exclusively by the partition
//! runner for that entity's partition. State is mutated only on event
//! arrival and evicted once the watermark passes `session_timeout` beyond
//! the session's last event. Memory is O(active sessions), never O(events):
//! every merge is an O(1) incremental update with no re-scan of history.
//!
//! The store also owns the deduplication window that makes `upsert`
//! idempotent under at-least-once redelivery from the transport.

use crate::enrichstream::types::Event;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Configuration for session state management
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity gap after which a session is closed and evicted
    pub session_timeout: Duration,
    /// Maximum recent event ids remembered per key for deduplication
    pub dedup_window: usize,
    /// How often the partition runner sweeps for expired sessions
    pub eviction_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            dedup_window: 64,
            eviction_interval: Duration::from_secs(10),
        }
    }
}

/// Per-entity session aggregates.
///
/// `running_aggregates` holds incrementally maintained sums for every
/// numeric attribute observed on the session's events.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Earliest event time observed for the session
    pub session_start: DateTime<Utc>,
    /// Latest event time observed for the session
    pub last_event_time: DateTime<Utc>,
    /// Number of distinct events merged into the session
    pub event_count: u64,
    /// Rolling numeric sums keyed by attribute name
    pub running_aggregates: HashMap<String, f64>,
    /// Recent (event_time_ms, event_id) pairs for idempotent upsert
    recent_ids: VecDeque<(i64, String)>,
}

impl SessionState {
    fn new(event: &Event) -> Self {
        let mut state = Self {
            session_start: event.event_time,
            last_event_time: event.event_time,
            event_count: 0,
            running_aggregates: HashMap::new(),
            recent_ids: VecDeque::new(),
        };
        state.merge(event);
        state
    }

    /// Session duration in milliseconds.
    pub fn session_duration_ms(&self) -> i64 {
        self.last_event_time.timestamp_millis() - self.session_start.timestamp_millis()
    }

    fn seen(&self, event: &Event) -> bool {
        let identity = (event.event_time_ms(), &event.event_id);
        self.recent_ids
            .iter()
            .any(|(ms, id)| (*ms, id) == identity)
    }

    fn merge(&mut self, event: &Event) {
        self.event_count += 1;
        if event.event_time < self.session_start {
            // Out-of-order arrival within the lateness bound extends the
            // session backwards.
            self.session_start = event.event_time;
        }
        if event.event_time > self.last_event_time {
            self.last_event_time = event.event_time;
        }
        for (name, value) in &event.attributes {
            if let Some(n) = value.as_f64() {
                *self.running_aggregates.entry(name.clone()).or_insert(0.0) += n;
            }
        }
    }

    fn remember(&mut self, event: &Event, window: usize) {
        if self.recent_ids.len() >= window {
            self.recent_ids.pop_front();
        }
        self.recent_ids
            .push_back((event.event_time_ms(), event.event_id.clone()));
    }
}

/// Outcome of a session upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// The event was merged; the updated state is returned by value
    Applied(SessionState),
    /// The event's (event_time, event_id) identity was already seen
    Duplicate,
}

/// Partition-local keyed session store
///
/// Not shared across partitions: each partition runner owns exactly one
/// store, so no locking is required.
pub struct SessionStore {
    sessions: HashMap<String, SessionState>,
    config: SessionConfig,
}

impl SessionStore {
    /// Create an empty store
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Merge an event into its session, creating the session on first sight.
    ///
    /// Idempotent: redelivered events (same event_time + event_id within the
    /// dedup window) return `Duplicate` without touching aggregates.
    pub fn upsert(&mut self, event: &Event) -> UpsertOutcome {
        match self.sessions.get_mut(&event.key) {
            Some(state) => {
                if state.seen(event) {
                    return UpsertOutcome::Duplicate;
                }
                state.merge(event);
                state.remember(event, self.config.dedup_window);
                UpsertOutcome::Applied(state.clone())
            }
            None => {
                let mut state = SessionState::new(event);
                state.remember(event, self.config.dedup_window);
                let snapshot = state.clone();
                self.sessions.insert(event.key.clone(), state);
                UpsertOutcome::Applied(snapshot)
            }
        }
    }

    /// Remove and return all sessions older than `watermark - session_timeout`.
    ///
    /// Called as the watermark advances to keep memory bounded by the number
    /// of active sessions.
    pub fn evict(&mut self, watermark_ms: i64) -> Vec<(String, SessionState)> {
        let timeout_ms = self.config.session_timeout.as_millis() as i64;
        let cutoff = watermark_ms - timeout_ms;

        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, state)| state.last_event_time.timestamp_millis() < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.sessions.remove(&key).map(|state| (key, state)))
            .collect()
    }

    /// Number of currently active sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// How often the owner should run an eviction sweep.
    pub fn eviction_interval(&self) -> Duration {
        self.config.eviction_interval
    }

    /// Read-only view of a session, if one is open for the key.
    pub fn get(&self, key: &str) -> Option<&SessionState> {
        self.sessions.get(key)
    }
}
