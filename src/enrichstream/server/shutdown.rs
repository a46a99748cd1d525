//! Signal handling for graceful shutdown
//!
//! Supports SIGINT (Ctrl+C) and SIGTERM (kill/Kubernetes/Docker).
//! Orchestrators send SIGTERM first and SIGKILL after a grace period, so the
//! engine must drain partitions and flush open batches before the grace
//! period expires; the coordinator's `shutdown` does exactly that once the
//! signal arrives.

use log::info;
use std::fmt;

/// The type of shutdown signal received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT - user interrupt (Ctrl+C)
    Interrupt,
    /// SIGTERM - termination request (kill, Kubernetes, Docker)
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT (Ctrl+C)"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for any shutdown signal.
#[cfg(unix)]
pub async fn shutdown_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    let received = tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
    };

    info!("Received {}, initiating graceful shutdown", received);
    received
}

/// Wait for Ctrl+C on non-unix platforms.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> ShutdownSignal {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, initiating graceful shutdown");
    ShutdownSignal::Interrupt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT (Ctrl+C)");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
