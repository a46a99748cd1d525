/*!
# Engine Error Handling

Error types for the enrichment engine. Per-record and per-batch failures
(late arrivals, lookup timeouts, dispatch rejections) are handled inside the
pipeline (retried, degraded, or dead-lettered) and never surface as `Err`
from the processing loops. Only startup and resource-level failures
propagate through `EngineResult`.

## Error Categories

- **Malformed Events**: validation failures before any state update
- **Late Events**: arrivals behind the partition watermark
- **Lookup Errors**: external enrichment store timeouts/unavailability
- **Dispatch Errors**: inference boundary rejections after retry exhaustion
- **Configuration Errors**: invalid engine configuration at startup
- **Resource Errors**: channel/partition capacity exhaustion
*/

use std::fmt;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error types for enrichment engine operations.
///
/// Each variant carries the context needed to dead-letter or report the
/// failure without consulting any other state.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Event failed validation before reaching the session store.
    MalformedEvent {
        /// Description of the validation failure
        message: String,
        /// Event id if one was present on the input
        event_id: Option<String>,
    },

    /// Event arrived behind the partition watermark.
    LateEvent {
        /// Event id of the late arrival
        event_id: String,
        /// Event time in milliseconds since epoch
        event_time_ms: i64,
        /// Watermark in milliseconds since epoch at rejection time
        watermark_ms: i64,
    },

    /// Enrichment lookup failed after all retries and fallbacks.
    LookupFailed {
        /// Entity key being looked up
        key: String,
        /// Description of the last failure
        message: String,
    },

    /// Batch dispatch failed after retry exhaustion.
    DispatchFailed {
        /// Description of the last failure
        message: String,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// Invalid engine configuration detected at startup.
    ConfigurationError {
        /// Description of the invalid setting
        message: String,
    },

    /// A bounded resource (channel, partition set) was exhausted or closed.
    ResourceExhausted {
        /// Name of the exhausted resource
        resource: String,
        /// Description of the exhaustion condition
        message: String,
    },
}

impl EngineError {
    /// Create a malformed-event error.
    pub fn malformed(message: impl Into<String>, event_id: Option<String>) -> Self {
        EngineError::MalformedEvent {
            message: message.into(),
            event_id,
        }
    }

    /// Create a late-event error.
    pub fn late(event_id: impl Into<String>, event_time_ms: i64, watermark_ms: i64) -> Self {
        EngineError::LateEvent {
            event_id: event_id.into(),
            event_time_ms,
            watermark_ms,
        }
    }

    /// Create a lookup-failure error.
    pub fn lookup_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::LookupFailed {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a dispatch-failure error.
    pub fn dispatch_failed(message: impl Into<String>, attempts: u32) -> Self {
        EngineError::DispatchFailed {
            message: message.into(),
            attempts,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a resource-exhaustion error.
    pub fn resource_exhausted(resource: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::ResourceExhausted {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MalformedEvent { message, event_id } => match event_id {
                Some(id) => write!(f, "Malformed event '{}': {}", id, message),
                None => write!(f, "Malformed event: {}", message),
            },
            EngineError::LateEvent {
                event_id,
                event_time_ms,
                watermark_ms,
            } => write!(
                f,
                "Late event '{}': event_time {}ms is behind watermark {}ms",
                event_id, event_time_ms, watermark_ms
            ),
            EngineError::LookupFailed { key, message } => {
                write!(f, "Lookup failed for key '{}': {}", key, message)
            }
            EngineError::DispatchFailed { message, attempts } => {
                write!(f, "Dispatch failed after {} attempts: {}", attempts, message)
            }
            EngineError::ConfigurationError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            EngineError::ResourceExhausted { resource, message } => {
                write!(f, "Resource '{}' exhausted: {}", resource, message)
            }
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_malformed() {
        let err = EngineError::malformed("missing entity key", Some("ev-1".to_string()));
        assert_eq!(err.to_string(), "Malformed event 'ev-1': missing entity key");

        let err = EngineError::malformed("empty payload", None);
        assert_eq!(err.to_string(), "Malformed event: empty payload");
    }

    #[test]
    fn test_display_late() {
        let err = EngineError::late("ev-2", 100, 500);
        assert_eq!(
            err.to_string(),
            "Late event 'ev-2': event_time 100ms is behind watermark 500ms"
        );
    }

    #[test]
    fn test_display_dispatch() {
        let err = EngineError::dispatch_failed("sink unreachable", 3);
        assert_eq!(
            err.to_string(),
            "Dispatch failed after 3 attempts: sink unreachable"
        );
    }
}
