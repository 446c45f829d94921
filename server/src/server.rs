//! The runtime server aggregate.
//!
//! Owns the restoration, streaming, exit-monitoring, and shutdown machinery
//! around a shared sandbox/container registry, and exposes the lifecycle
//! entry points the request handlers drive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use berth_core::clock::Clock;
use berth_core::config::BerthConfig;
use berth_core::error::{BerthError, Result};
use berth_core::idmap::IdMappings;
use berth_core::signal::CloseNotifier;
use berth_runtime::container::{Container, ContainerState};
use berth_runtime::hostport::HostPortManager;
use berth_runtime::network::NetworkPlugin;
use berth_runtime::oci::OciRuntime;
use berth_runtime::registry::Registry;
use berth_runtime::sandbox::{Sandbox, SandboxState};
use berth_runtime::seccomp::{self, SeccompProfile};
use berth_runtime::storage::ContainerStorage;
use berth_runtime::{apparmor, watch::EventSource};

use crate::cert_cache::CertConfigCache;
use crate::exit_monitor::ExitMonitor;
use crate::stream::{self, SessionKind, StreamEndpoint, StreamSession, StreamTls};

/// Network-facing shared state: any structural mutation (attach/detach
/// network, reserve/release host ports) takes the write half of the
/// server's lock; status queries share the read half.
pub struct NetState {
    pub plugin: Arc<dyn NetworkPlugin>,
    pub hostports: HostPortManager,
}

/// External collaborators handed to the server at construction.
pub struct Collaborators {
    pub registry: Arc<Registry>,
    pub storage: Arc<dyn ContainerStorage>,
    pub runtime: Arc<dyn OciRuntime>,
    pub network: Arc<dyn NetworkPlugin>,
    pub clock: Arc<dyn Clock>,
}

/// The long-lived runtime server.
pub struct Server {
    pub(crate) config: BerthConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) storage: Arc<dyn ContainerStorage>,
    pub(crate) runtime: Arc<dyn OciRuntime>,
    pub(crate) net: RwLock<NetState>,
    seccomp_profile: Option<SeccompProfile>,
    apparmor_profile: Option<String>,
    id_mappings: Option<IdMappings>,
    monitors: CloseNotifier,
    stream: StreamEndpoint,
}

impl Server {
    /// Construct the server: load security profiles, derive identity
    /// mappings, restore tracked state from storage, honor a leftover
    /// shutdown marker, and start the streaming endpoint.
    ///
    /// Any failure here aborts construction; the process must not start
    /// half-initialized.
    pub async fn new(config: BerthConfig, deps: Collaborators) -> Result<Server> {
        for dir in [&config.attach_dir, &config.exits_dir, &config.state_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                BerthError::ConfigError(format!(
                    "failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let id_mappings = IdMappings::from_spec(&config.uid_mappings, &config.gid_mappings)?;

        let seccomp_profile = if seccomp::is_enabled() {
            Some(seccomp::load_profile(&config.seccomp_profile)?)
        } else {
            None
        };

        let apparmor_profile = if apparmor::is_enabled() {
            if config.apparmor_profile == apparmor::DEFAULT_PROFILE {
                apparmor::ensure_default_profile()?;
            }
            Some(config.apparmor_profile.clone())
        } else {
            None
        };

        let bind_address = stream::resolve_bind_address(&config.stream_address)?;
        let port = stream::validate_stream_port(&config.stream_port)?;
        let stream_addr = SocketAddr::new(bind_address, port);

        let tls = if config.stream_enable_tls {
            let cache = Arc::new(CertConfigCache::new(
                &config.stream_tls_cert,
                &config.stream_tls_key,
                config.stream_tls_ca.clone(),
                deps.clock.clone(),
            ));
            Some(StreamTls {
                cache,
                cert_path: config.stream_tls_cert.clone(),
                key_path: config.stream_tls_key.clone(),
            })
        } else {
            None
        };

        let stream = StreamEndpoint::new(stream_addr, deps.registry.clone(), tls)?;

        let server = Server {
            config,
            registry: deps.registry,
            storage: deps.storage,
            runtime: deps.runtime,
            net: RwLock::new(NetState {
                plugin: deps.network,
                hostports: HostPortManager::new(),
            }),
            seccomp_profile,
            apparmor_profile,
            id_mappings,
            monitors: CloseNotifier::new(),
            stream,
        };

        server.restore().await;
        server.cleanup_sandboxes_on_shutdown().await;

        server.stream.start();

        tracing::debug!(
            sandboxes = server.registry.list_sandboxes().len(),
            containers = server.registry.list_containers(None).len(),
            "Server constructed"
        );
        Ok(server)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn id_mappings(&self) -> Option<&IdMappings> {
        self.id_mappings.as_ref()
    }

    pub fn seccomp_profile(&self) -> Option<&SeccompProfile> {
        self.seccomp_profile.as_ref()
    }

    pub fn apparmor_profile(&self) -> Option<&str> {
        self.apparmor_profile.as_deref()
    }

    // ── Registry delegation ──────────────────────────────────────────
    // Request handlers touch the registry only through the server.

    pub fn add_sandbox(&self, sandbox: Sandbox) {
        self.registry.add_sandbox(sandbox);
    }

    pub fn get_sandbox(&self, id: &str) -> Option<Sandbox> {
        self.registry.get_sandbox(id)
    }

    pub fn remove_sandbox(&self, id: &str) -> Option<Sandbox> {
        self.registry.remove_sandbox(id)
    }

    pub fn add_container(&self, container: Container) {
        self.registry.add_container(container);
    }

    pub fn get_container(&self, id: &str) -> Option<Container> {
        self.registry.get_container(id)
    }

    pub fn remove_container(&self, id: &str) -> Option<Container> {
        self.registry.remove_container(id)
    }

    pub fn add_infra_container(&self, container: Container) {
        self.registry.add_infra_container(container);
    }

    pub fn get_infra_container(&self, sandbox_id: &str) -> Option<Container> {
        self.registry.get_infra_container(sandbox_id)
    }

    pub fn remove_infra_container(&self, sandbox_id: &str) -> Option<Container> {
        self.registry.remove_infra_container(sandbox_id)
    }

    // ── Background monitors ──────────────────────────────────────────

    /// Build the exit-event reconciler sharing this server's registry.
    pub fn exit_monitor(&self) -> ExitMonitor {
        ExitMonitor::new(
            self.registry.clone(),
            self.runtime.clone(),
            self.storage.clone(),
            self.monitors.clone(),
        )
    }

    /// Run the exit-event reconciler over `source` until stopped.
    pub async fn start_exit_monitor(&self, source: impl EventSource) {
        self.exit_monitor().run(source).await
    }

    /// Stop all background monitors.
    pub fn stop_monitors(&self) {
        self.monitors.close();
    }

    /// The close signal shared by the background monitors.
    pub fn monitors_close(&self) -> CloseNotifier {
        self.monitors.clone()
    }

    /// Stop the streaming endpoint. Idempotent.
    pub fn stop_stream(&self) {
        self.stream.stop();
    }

    /// The streaming endpoint's close signal.
    pub fn stream_close(&self) -> CloseNotifier {
        self.stream.close_notifier()
    }

    // ── Lifecycle entry points ───────────────────────────────────────

    /// Resolve a sandbox from a request-supplied (possibly partial) ID.
    pub fn sandbox_from_request(&self, id: &str) -> Result<Sandbox> {
        if id.is_empty() {
            return Err(BerthError::SandboxError(
                "pod sandbox ID cannot be empty".to_string(),
            ));
        }
        let full_id = self.registry.resolve_sandbox_id(id)?;
        self.registry.get_sandbox(&full_id).ok_or_else(|| {
            BerthError::SandboxError(format!("specified pod sandbox not found: {}", full_id))
        })
    }

    /// Register an exec session, returning the URL to connect to.
    pub async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        tty: bool,
        stdin: bool,
    ) -> Result<String> {
        let container = self.registry.get_container(container_id).ok_or_else(|| {
            BerthError::ContainerError(format!("container not found: {}", container_id))
        })?;
        let session = StreamSession {
            kind: SessionKind::Exec,
            attach_socket: self.attach_socket_path(&container.id),
            container_id: container.id,
            sandbox_id: container.sandbox_id,
            cmd,
            tty,
            stdin,
            ports: vec![],
        };
        Ok(self.stream.handle().register(session).await)
    }

    /// Register an attach session, returning the URL to connect to.
    pub async fn attach(&self, container_id: &str, tty: bool, stdin: bool) -> Result<String> {
        let container = self.registry.get_container(container_id).ok_or_else(|| {
            BerthError::ContainerError(format!("container not found: {}", container_id))
        })?;
        let session = StreamSession {
            kind: SessionKind::Attach,
            attach_socket: self.attach_socket_path(&container.id),
            container_id: container.id,
            sandbox_id: container.sandbox_id,
            cmd: vec![],
            tty,
            stdin,
            ports: vec![],
        };
        Ok(self.stream.handle().register(session).await)
    }

    /// Register a port-forward session against a sandbox, returning the URL
    /// to connect to.
    pub async fn port_forward(&self, sandbox_id: &str, ports: Vec<i32>) -> Result<String> {
        let sandbox = self.sandbox_from_request(sandbox_id)?;
        let session = StreamSession {
            kind: SessionKind::PortForward,
            attach_socket: self.attach_socket_path(&sandbox.id),
            container_id: String::new(),
            sandbox_id: sandbox.id,
            cmd: vec![],
            tty: false,
            stdin: false,
            ports,
        };
        Ok(self.stream.handle().register(session).await)
    }

    /// Stop a pod sandbox: mark its containers exited, detach its network,
    /// and release its host ports. Stopping a stopped sandbox is a no-op.
    pub async fn stop_pod_sandbox(&self, id: &str) -> Result<()> {
        let sandbox = self.sandbox_from_request(id)?;
        if sandbox.state == SandboxState::NotReady {
            return Ok(());
        }

        let finished_at = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let stop = |c: &mut Container| {
            c.state = ContainerState::Exited;
            c.finished_at = finished_at;
            c.exit_code = 137;
        };

        let mut stopped = Vec::new();
        for container in self.registry.list_containers(Some(&sandbox.id)) {
            if !container.is_alive() {
                continue;
            }
            if let Some(updated) = self.registry.update_container(&container.id, stop) {
                stopped.push(updated);
            }
        }
        if let Some(infra) = self.registry.get_infra_container(&sandbox.id) {
            if infra.is_alive() {
                if let Some(updated) = self.registry.update_infra_container(&sandbox.id, stop) {
                    stopped.push(updated);
                }
            }
        }

        for container in &stopped {
            if let Err(e) = self.storage.persist_state(container).await {
                tracing::warn!(
                    container_id = %container.id,
                    error = %e,
                    "Failed to persist stopped container state"
                );
            }
        }

        {
            let mut net = self.net.write();
            if let Err(e) = net.plugin.teardown_pod(&sandbox) {
                tracing::warn!(
                    sandbox_id = %sandbox.id,
                    error = %e,
                    "Failed to tear down pod network"
                );
            }
            net.hostports.release(&sandbox.id);
        }

        self.registry
            .update_sandbox(&sandbox.id, |sb| sb.state = SandboxState::NotReady);
        tracing::info!(sandbox_id = %sandbox.id, "Stopped pod sandbox");
        Ok(())
    }

    /// Force-stop every tracked pod sandbox, best effort.
    pub async fn stop_all_pod_sandboxes(&self) {
        for sandbox in self.registry.list_sandboxes() {
            if let Err(e) = self.stop_pod_sandbox(&sandbox.id).await {
                tracing::warn!(
                    sandbox_id = %sandbox.id,
                    error = %e,
                    "Failed to stop pod sandbox"
                );
            }
        }
    }

    pub(crate) fn attach_socket_path(&self, id: &str) -> PathBuf {
        self.config.attach_dir.join(id).join("attach")
    }
}
