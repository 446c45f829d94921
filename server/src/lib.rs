//! Berth Server - node-local runtime management for pod sandboxes.
//!
//! The layer a kubelet-equivalent orchestrator talks to: restores tracked
//! sandbox/container state after a restart, reconciles external process
//! exits with the registry, serves exec/attach/port-forward sessions with
//! hot-reloadable transport security, and distinguishes host shutdown from
//! service restart at teardown.

pub mod cert_cache;
pub mod exit_monitor;
pub mod metrics;
mod restore;
pub mod server;
mod shutdown;
pub mod stream;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use cert_cache::CertConfigCache;
pub use exit_monitor::ExitMonitor;
pub use server::{Collaborators, NetState, Server};
pub use stream::{SessionKind, StreamEndpoint, StreamSession};

/// Berth server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
