//! Host port reservations for pod sandboxes.
//!
//! Mutations are guarded by the server's shared network lock; the manager
//! itself only tracks which host ports each sandbox holds.

use std::collections::HashMap;

use berth_core::error::{BerthError, Result};

/// Tracks host-port reservations per sandbox.
#[derive(Debug, Default)]
pub struct HostPortManager {
    reservations: HashMap<String, Vec<u16>>,
}

impl HostPortManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve host ports for a sandbox. Fails without side effects if any
    /// requested port is already held.
    pub fn reserve(&mut self, sandbox_id: &str, ports: &[u16]) -> Result<()> {
        for port in ports {
            if let Some(holder) = self.holder(*port) {
                return Err(BerthError::HostPortError(format!(
                    "host port {} already reserved by sandbox {}",
                    port, holder
                )));
            }
        }
        self.reservations
            .entry(sandbox_id.to_string())
            .or_default()
            .extend_from_slice(ports);
        Ok(())
    }

    /// Release every port held by a sandbox, returning them.
    pub fn release(&mut self, sandbox_id: &str) -> Vec<u16> {
        self.reservations.remove(sandbox_id).unwrap_or_default()
    }

    /// Whether a host port is currently reserved.
    pub fn is_reserved(&self, port: u16) -> bool {
        self.holder(port).is_some()
    }

    fn holder(&self, port: u16) -> Option<&str> {
        self.reservations
            .iter()
            .find(|(_, ports)| ports.contains(&port))
            .map(|(id, _)| id.as_str())
    }
}
