pub mod boundary;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod server;
pub mod types;

// Re-export the types most callers need
pub use boundary::{DeadLetterSink, DispatchResponse, InferenceSink, LookupStore};
pub use engine::{EngineConfig, EngineCoordinator};
pub use error::{EngineError, EngineResult};
pub use types::{Batch, DeadLetterEntry, EnrichedRecord, Event, FailureReason};
