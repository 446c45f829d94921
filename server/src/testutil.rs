//! Shared fixtures for server tests: in-memory collaborators and config.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use berth_core::config::BerthConfig;
use berth_core::error::{BerthError, Result};
use berth_runtime::container::{Container, ContainerState};
use berth_runtime::network::NetworkPlugin;
use berth_runtime::oci::{OciRuntime, ProcessStatus};
use berth_runtime::sandbox::{Sandbox, SandboxState};
use berth_runtime::storage::{ContainerMetadata, ContainerStorage};

pub(crate) fn test_sandbox(id: &str) -> Sandbox {
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

pub(crate) fn test_container(id: &str, sandbox_id: &str) -> Container {
    Container {
        id: id.to_string(),
        sandbox_id: sandbox_id.to_string(),
        name: format!("container-{}", id),
        state: ContainerState::Running,
        created_at: 1000000000,
        started_at: 1000000001,
        finished_at: 0,
        exit_code: 0,
        labels: HashMap::new(),
        annotations: HashMap::new(),
    }
}

/// Process-supervision fake recording which containers were queried.
pub(crate) struct FakeRuntime {
    status: Option<ProcessStatus>,
    calls: Mutex<Vec<String>>,
}

impl FakeRuntime {
    /// Every query reports the container exited with `exit_code`.
    pub(crate) fn exited(exit_code: i32) -> Self {
        Self {
            status: Some(ProcessStatus {
                state: ContainerState::Exited,
                exit_code,
                finished_at: 2000000000,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every query fails.
    pub(crate) fn failing() -> Self {
        Self {
            status: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl OciRuntime for FakeRuntime {
    async fn update_status(&self, container: &Container) -> Result<ProcessStatus> {
        self.calls.lock().push(container.id.clone());
        self.status
            .ok_or_else(|| BerthError::RuntimeError("status query failed".to_string()))
    }
}

/// In-memory storage fake with injectable failures and load delays.
#[derive(Default)]
pub(crate) struct MemStorage {
    entities: Mutex<Vec<String>>,
    metadata: Mutex<HashMap<String, ContainerMetadata>>,
    sandboxes: Mutex<HashMap<String, (Sandbox, Container)>>,
    containers: Mutex<HashMap<String, Container>>,
    bad_metadata: Mutex<HashSet<String>>,
    fail_sandbox_loads: Mutex<HashSet<String>>,
    sandbox_load_delay: Mutex<Duration>,
    persisted_log: Mutex<Vec<String>>,
    shutdown_called: AtomicBool,
}

impl MemStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed_sandbox(&self, sandbox: Sandbox, infra: Container) {
        self.entities.lock().push(sandbox.id.clone());
        self.metadata.lock().insert(
            sandbox.id.clone(),
            ContainerMetadata {
                name: sandbox.name.clone(),
                pod_id: sandbox.id.clone(),
                is_pod: true,
            },
        );
        self.sandboxes
            .lock()
            .insert(sandbox.id.clone(), (sandbox, infra));
    }

    pub(crate) fn seed_container(&self, container: Container) {
        self.entities.lock().push(container.id.clone());
        self.metadata.lock().insert(
            container.id.clone(),
            ContainerMetadata {
                name: container.name.clone(),
                pod_id: container.sandbox_id.clone(),
                is_pod: false,
            },
        );
        self.containers
            .lock()
            .insert(container.id.clone(), container);
    }

    /// Make metadata for `id` unreadable.
    pub(crate) fn seed_bad_metadata(&self, id: &str) {
        self.entities.lock().push(id.to_string());
        self.bad_metadata.lock().insert(id.to_string());
    }

    /// Make `load_sandbox` fail for `id`.
    pub(crate) fn fail_sandbox_load(&self, id: &str) {
        self.fail_sandbox_loads.lock().insert(id.to_string());
    }

    /// Delay every sandbox load, exaggerating the restoration window.
    pub(crate) fn set_sandbox_load_delay(&self, delay: Duration) {
        *self.sandbox_load_delay.lock() = delay;
    }

    pub(crate) fn persisted(&self) -> Vec<String> {
        self.persisted_log.lock().clone()
    }

    pub(crate) fn shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ContainerStorage for MemStorage {
    async fn list_entities(&self) -> Result<Vec<String>> {
        Ok(self.entities.lock().clone())
    }

    async fn metadata(&self, id: &str) -> Result<ContainerMetadata> {
        if self.bad_metadata.lock().contains(id) {
            return Err(BerthError::StorageError(format!(
                "error parsing metadata for {}",
                id
            )));
        }
        self.metadata
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| BerthError::StorageError(format!("no metadata for {}", id)))
    }

    async fn load_sandbox(&self, id: &str) -> Result<(Sandbox, Container)> {
        let delay = *self.sandbox_load_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sandbox_loads.lock().contains(id) {
            return Err(BerthError::StorageError(format!(
                "sandbox {} is corrupt",
                id
            )));
        }
        self.sandboxes
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| BerthError::StorageError(format!("no sandbox record for {}", id)))
    }

    async fn load_container(&self, id: &str) -> Result<Container> {
        self.containers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| BerthError::StorageError(format!("no container record for {}", id)))
    }

    async fn persist_state(&self, container: &Container) -> Result<()> {
        self.persisted_log.lock().push(container.id.clone());
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_called.store(true, Ordering::Release);
        Ok(())
    }
}

/// Network fake serving fixed per-sandbox addresses.
#[derive(Default)]
pub(crate) struct StaticNetwork {
    ips: Mutex<HashMap<String, IpAddr>>,
    torn_down: Mutex<Vec<String>>,
}

impl StaticNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_ip(&self, sandbox_id: &str, ip: IpAddr) {
        self.ips.lock().insert(sandbox_id.to_string(), ip);
    }

    pub(crate) fn torn_down(&self) -> Vec<String> {
        self.torn_down.lock().clone()
    }
}

impl NetworkPlugin for StaticNetwork {
    fn setup_pod(&self, sandbox: &Sandbox) -> Result<IpAddr> {
        self.pod_ip(sandbox)
    }

    fn teardown_pod(&self, sandbox: &Sandbox) -> Result<()> {
        self.torn_down.lock().push(sandbox.id.clone());
        Ok(())
    }

    fn pod_ip(&self, sandbox: &Sandbox) -> Result<IpAddr> {
        self.ips
            .lock()
            .get(&sandbox.id)
            .copied()
            .ok_or_else(|| {
                BerthError::NetworkError(format!("no address for sandbox {}", sandbox.id))
            })
    }
}

const TEST_SECCOMP_PROFILE: &str = r#"{
    "defaultAction": "SCMP_ACT_ALLOW",
    "architectures": [],
    "syscalls": []
}"#;

/// Config rooted in a temp directory, streaming on an ephemeral local port.
pub(crate) fn test_config(root: &Path) -> BerthConfig {
    let seccomp_profile = root.join("seccomp.json");
    std::fs::write(&seccomp_profile, TEST_SECCOMP_PROFILE).unwrap();

    BerthConfig {
        state_dir: root.join("state"),
        exits_dir: root.join("exits"),
        attach_dir: root.join("attach"),
        shutdown_marker: root.join("berth.shutdown"),
        network_state_dir: root.join("networks"),
        stream_address: "127.0.0.1".to_string(),
        stream_port: "0".to_string(),
        stream_enable_tls: false,
        stream_tls_cert: root.join("stream.crt"),
        stream_tls_key: root.join("stream.key"),
        stream_tls_ca: None,
        seccomp_profile,
        apparmor_profile: "unconfined".to_string(),
        uid_mappings: String::new(),
        gid_mappings: String::new(),
        metrics_port: 0,
    }
}
