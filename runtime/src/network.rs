//! Network plugin collaborator.
//!
//! Plugin internals (CNI, IPAM) are external; the server drives attach,
//! detach, and address recovery through this interface, always under the
//! shared network lock. Calls block; none are issued on a hot path.
//!
//! `FileNetworkPlugin` is the bundled host-local implementation: one JSON
//! allocation record per sandbox under the network state directory.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use berth_core::error::{BerthError, Result};

use crate::sandbox::Sandbox;

/// Capability interface over the pod network plugin.
pub trait NetworkPlugin: Send + Sync {
    /// Attach a sandbox to the pod network, returning its address.
    fn setup_pod(&self, sandbox: &Sandbox) -> Result<IpAddr>;

    /// Detach a sandbox from the pod network.
    fn teardown_pod(&self, sandbox: &Sandbox) -> Result<()>;

    /// Recover the address of an already-attached sandbox.
    fn pod_ip(&self, sandbox: &Sandbox) -> Result<IpAddr>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Allocation {
    ip: IpAddr,
}

/// Host-local network plugin persisting allocations as JSON files.
#[derive(Debug)]
pub struct FileNetworkPlugin {
    state_dir: PathBuf,
    /// First three octets of the managed /24.
    subnet: [u8; 3],
}

impl FileNetworkPlugin {
    /// Open (creating if needed) a plugin managing `10.88.0.0/24` state
    /// under `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).map_err(|e| {
            BerthError::NetworkError(format!(
                "failed to create network state dir {}: {}",
                state_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            state_dir,
            subnet: [10, 88, 0],
        })
    }

    fn allocation_path(&self, sandbox_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", sandbox_id))
    }

    fn allocated_ips(&self) -> Result<Vec<IpAddr>> {
        let entries = std::fs::read_dir(&self.state_dir).map_err(|e| {
            BerthError::NetworkError(format!(
                "failed to read network state dir {}: {}",
                self.state_dir.display(),
                e
            ))
        })?;

        let mut ips = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BerthError::NetworkError(format!("failed to enumerate allocations: {}", e))
            })?;
            if let Ok(data) = std::fs::read_to_string(entry.path()) {
                if let Ok(alloc) = serde_json::from_str::<Allocation>(&data) {
                    ips.push(alloc.ip);
                }
            }
        }
        Ok(ips)
    }
}

impl NetworkPlugin for FileNetworkPlugin {
    fn setup_pod(&self, sandbox: &Sandbox) -> Result<IpAddr> {
        let path = self.allocation_path(&sandbox.id);
        if path.exists() {
            return self.pod_ip(sandbox);
        }

        let taken = self.allocated_ips()?;
        let [a, b, c] = self.subnet;
        // .1 is the gateway; scan the remaining host range.
        let ip = (2..=254u8)
            .map(|d| IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
            .find(|candidate| !taken.contains(candidate))
            .ok_or_else(|| {
                BerthError::NetworkError(format!(
                    "no free addresses in {}.{}.{}.0/24",
                    a, b, c
                ))
            })?;

        let json = serde_json::to_string(&Allocation { ip })
            .map_err(|e| BerthError::NetworkError(format!("failed to serialize allocation: {}", e)))?;
        std::fs::write(&path, json).map_err(|e| {
            BerthError::NetworkError(format!(
                "failed to write allocation {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!(sandbox_id = %sandbox.id, ip = %ip, "attached sandbox to pod network");
        Ok(ip)
    }

    fn teardown_pod(&self, sandbox: &Sandbox) -> Result<()> {
        let path = self.allocation_path(&sandbox.id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BerthError::NetworkError(format!(
                "failed to remove allocation {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn pod_ip(&self, sandbox: &Sandbox) -> Result<IpAddr> {
        let path = self.allocation_path(&sandbox.id);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            BerthError::NetworkError(format!(
                "no allocation for sandbox {}: {}",
                sandbox.id, e
            ))
        })?;
        let alloc: Allocation = serde_json::from_str(&data).map_err(|e| {
            BerthError::NetworkError(format!(
                "failed to parse allocation {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(alloc.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxState;
    use std::collections::HashMap;

    fn test_sandbox(id: &str) -> Sandbox {
        Sandbox {
            id: id.to_string(),
            name: format!("pod-{}", id),
            namespace: "default".to_string(),
            state: SandboxState::Ready,
            created_at: 1000000000,
            ip: None,
            labels: HashMap::new(),
            annotations: HashMap::new(),
        }
    }

    #[test]
    fn test_setup_allocates_distinct_ips() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FileNetworkPlugin::new(dir.path()).unwrap();

        let ip1 = plugin.setup_pod(&test_sandbox("sb1")).unwrap();
        let ip2 = plugin.setup_pod(&test_sandbox("sb2")).unwrap();
        assert_ne!(ip1, ip2);
    }

    #[test]
    fn test_setup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FileNetworkPlugin::new(dir.path()).unwrap();

        let sb = test_sandbox("sb1");
        let ip1 = plugin.setup_pod(&sb).unwrap();
        let ip2 = plugin.setup_pod(&sb).unwrap();
        assert_eq!(ip1, ip2);
    }

    #[test]
    fn test_pod_ip_recovers_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FileNetworkPlugin::new(dir.path()).unwrap();

        let sb = test_sandbox("sb1");
        let allocated = plugin.setup_pod(&sb).unwrap();
        assert_eq!(plugin.pod_ip(&sb).unwrap(), allocated);
    }

    #[test]
    fn test_pod_ip_unknown_sandbox_errors() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FileNetworkPlugin::new(dir.path()).unwrap();

        let result = plugin.pod_ip(&test_sandbox("missing"));
        assert!(matches!(result, Err(BerthError::NetworkError(_))));
    }

    #[test]
    fn test_teardown_releases_address() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FileNetworkPlugin::new(dir.path()).unwrap();

        let sb = test_sandbox("sb1");
        plugin.setup_pod(&sb).unwrap();
        plugin.teardown_pod(&sb).unwrap();
        assert!(plugin.pod_ip(&sb).is_err());

        // Teardown of an unknown sandbox is not an error.
        plugin.teardown_pod(&sb).unwrap();
    }
}
