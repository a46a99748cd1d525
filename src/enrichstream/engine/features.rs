//! Pure feature derivation from events and session state
//!
//! Deterministic and side-effect free: given the same event and session
//! state, `compute` always produces the same `FeatureSet`, so it is unit
//! testable without any pipeline machinery. All calendar features are
//! UTC-normalized.

use crate::enrichstream::engine::session::SessionState;
use crate::enrichstream::types::{Event, FeatureSet};
use chrono::{Datelike, Timelike};

/// Derive time and session features for one event.
///
/// The session state passed in must already include this event (the store's
/// `upsert` runs first), so `session_event_count` counts the event itself.
pub fn compute(event: &Event, session: &SessionState) -> FeatureSet {
    FeatureSet {
        hour_of_day: event.event_time.hour(),
        day_of_week: event.event_time.weekday().num_days_from_monday(),
        session_duration_ms: session.session_duration_ms(),
        session_event_count: session.event_count,
        aggregates: session.running_aggregates.clone(),
    }
}
