//! Core pipeline components
//!
//! Leaf-first: watermark tracking, session state, feature derivation, and
//! the retry policy have no dependencies on each other; enrichment, batching,
//! and dispatch build on them; the partition runner composes one partition's
//! pipeline and the coordinator orchestrates all partitions.

pub mod batcher;
pub mod coordinator;
pub mod dead_letter;
pub mod dispatch;
pub mod enrichment;
pub mod features;
pub mod partition;
pub mod retry;
pub mod session;
pub mod watermark;

pub use batcher::{AppendOutcome, BatcherConfig, DeadlineBatcher};
pub use coordinator::{EngineConfig, EngineCoordinator};
pub use dead_letter::{DeadLetterConfig, DeadLetterQueue};
pub use dispatch::{DispatchConfig, DispatchController, DispatchOutcome};
pub use enrichment::{EnrichmentClient, EnrichmentConfig};
pub use partition::PartitionRunner;
pub use retry::BackoffPolicy;
pub use session::{SessionConfig, SessionState, SessionStore, UpsertOutcome};
pub use watermark::{WatermarkConfig, WatermarkTracker};
