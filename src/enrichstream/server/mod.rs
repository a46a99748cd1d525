//! Runtime support for hosting the engine as a service

pub mod prometheus_exporter;
pub mod shutdown;

pub use prometheus_exporter::EnginePrometheusExporter;
pub use shutdown::{shutdown_signal, ShutdownSignal};
