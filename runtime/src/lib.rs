//! Berth Runtime - collaborator layer for the runtime server.
//!
//! Entity model (sandboxes, containers), the shared in-memory registry, and
//! the interfaces the server core drives: persistent storage, OCI process
//! supervision, the network plugin, host ports, and filesystem event sources.

pub mod apparmor;
pub mod container;
pub mod hostport;
pub mod network;
pub mod oci;
pub mod registry;
pub mod sandbox;
pub mod seccomp;
pub mod storage;
pub mod watch;

// Re-export commonly used types
pub use container::{Container, ContainerState};
pub use hostport::HostPortManager;
pub use network::NetworkPlugin;
pub use oci::{OciRuntime, ProcessStatus};
pub use registry::Registry;
pub use sandbox::{Sandbox, SandboxState};
pub use storage::{ContainerMetadata, ContainerStorage};
pub use watch::{EventSource, WatchEvent};

/// Berth runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
