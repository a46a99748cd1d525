//! # enrichstream
//!
//! A real-time, stateful, latency-bounded event-enrichment engine. Turns a
//! raw ordered event stream into model-ready feature records and dispatches
//! them for inference within a strict end-to-end deadline.
//!
//! ## Features
//!
//! - **Partitioned Stateful Aggregation**: session-aware per-entity state
//!   with out-of-order tolerance bounded by event-time watermarks
//! - **Low-Latency Enrichment**: bounded-concurrency lookups against an
//!   unreliable external cache with timeout, retry, and stale/missing
//!   fallback; enrichment failure never blocks the pipeline
//! - **Deadline Batching**: size-or-deadline micro-batches bound worst-case
//!   per-record latency independent of arrival rate
//! - **Failure Isolation**: retry/backoff/dead-letter paths ensure one
//!   poisoned or slow event never stalls a whole partition
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use enrichstream::enrichstream::boundary::{
//!     CollectingInferenceSink, InMemoryLookupStore,
//! };
//! use enrichstream::enrichstream::engine::dead_letter::DeadLetterQueue;
//! use enrichstream::enrichstream::{EngineConfig, EngineCoordinator, Event};
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineCoordinator::start(
//!         EngineConfig::default(),
//!         Arc::new(InMemoryLookupStore::new()),
//!         Arc::new(CollectingInferenceSink::new()),
//!         Arc::new(DeadLetterQueue::new()),
//!     )?;
//!
//!     engine.submit(Event::new("ev-1", "user-1", Utc::now())).await?;
//!
//!     let summary = engine.shutdown().await?;
//!     println!("{}", summary.format_summary());
//!     Ok(())
//! }
//! ```

pub mod enrichstream;

pub use crate::enrichstream::{
    Batch, DeadLetterEntry, DeadLetterSink, DispatchResponse, EngineConfig, EngineCoordinator,
    EngineError, EngineResult, EnrichedRecord, Event, FailureReason, InferenceSink, LookupStore,
};
