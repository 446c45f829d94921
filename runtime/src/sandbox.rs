//! Pod sandbox entity.
//!
//! A sandbox is the shared execution context for the containers of one
//! workload instance; its namespaces are held open by exactly one infra
//! container whose ID equals the sandbox ID.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Sandbox lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    /// Sandbox is running and ready.
    Ready,
    /// Sandbox is not running.
    NotReady,
}

/// Represents a pod sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    /// Unique sandbox identifier (also the infra container's ID).
    pub id: String,
    /// Pod name.
    pub name: String,
    /// Kubernetes namespace.
    pub namespace: String,
    /// Current state.
    pub state: SandboxState,
    /// Creation timestamp in nanoseconds.
    pub created_at: i64,
    /// Sandbox network address, if known.
    pub ip: Option<IpAddr>,
    /// Pod labels.
    pub labels: HashMap<String, String>,
    /// Pod annotations.
    pub annotations: HashMap<String, String>,
}

impl Sandbox {
    /// Attach a recovered network address to this sandbox record.
    pub fn set_ip(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }
}
