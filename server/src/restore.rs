//! Startup restoration of tracked state from persisted storage.
//!
//! Rebuilds the in-memory registry after a restart so post-restoration state
//! matches what a continuously-running process would hold, modulo entities
//! that fail to parse. Restoration is best-effort throughout: one broken
//! entity is logged and skipped, never allowed to block the rest.

use berth_core::error::{BerthError, Result};
use berth_runtime::storage::{ContainerMetadata, ContainerStorage};

use crate::metrics;
use crate::server::Server;

/// Persisted entities partitioned by their metadata discriminator.
#[derive(Debug, Default)]
pub(crate) struct ClassifiedEntities {
    pub sandboxes: Vec<(String, ContainerMetadata)>,
    pub containers: Vec<(String, ContainerMetadata)>,
}

/// Classify every persisted entity as a sandbox or an ordinary container.
///
/// A metadata-read failure skips that single entity; partial restoration is
/// strictly better than aborting startup.
pub(crate) async fn classify(storage: &dyn ContainerStorage) -> ClassifiedEntities {
    let ids = match storage.list_entities().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read containers and sandboxes");
            return ClassifiedEntities::default();
        }
    };

    let mut classified = ClassifiedEntities::default();
    for id in ids {
        match storage.metadata(&id).await {
            Ok(metadata) => {
                if metadata.is_pod {
                    classified.sandboxes.push((id, metadata));
                } else {
                    classified.containers.push((id, metadata));
                }
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Error parsing metadata, ignoring");
            }
        }
    }
    classified
}

impl Server {
    /// Rebuild the registry from storage, then re-derive sandbox addresses.
    ///
    /// All sandboxes load before any container: containers reference their
    /// owning sandbox and must find it already present.
    pub(crate) async fn restore(&self) {
        let classified = classify(&*self.storage).await;

        for (id, metadata) in &classified.sandboxes {
            if let Err(e) = self.load_sandbox(id).await {
                metrics::RESTORE_FAILURES.with_label_values(&["sandbox"]).inc();
                tracing::warn!(
                    sandbox_id = %metadata.pod_id,
                    container_id = %id,
                    error = %e,
                    "Could not restore sandbox"
                );
            } else {
                metrics::ENTITIES_RESTORED.with_label_values(&["sandbox"]).inc();
            }
        }

        for (id, _) in &classified.containers {
            if let Err(e) = self.load_container(id).await {
                metrics::RESTORE_FAILURES.with_label_values(&["container"]).inc();
                tracing::warn!(container_id = %id, error = %e, "Could not restore container");
            } else {
                metrics::ENTITIES_RESTORED.with_label_values(&["container"]).inc();
            }
        }

        // Restore sandbox addresses. A sandbox the network plugin no longer
        // knows stays registered without an address, eligible for later
        // correction.
        for sandbox in self.registry.list_sandboxes() {
            let recovered = {
                let net = self.net.read();
                net.plugin.pod_ip(&sandbox)
            };
            match recovered {
                Ok(ip) => {
                    self.registry.update_sandbox(&sandbox.id, |sb| sb.set_ip(ip));
                }
                Err(e) => {
                    tracing::warn!(
                        sandbox_id = %sandbox.id,
                        error = %e,
                        "Could not restore sandbox IP"
                    );
                }
            }
        }
    }

    async fn load_sandbox(&self, id: &str) -> Result<()> {
        let (sandbox, infra) = self.storage.load_sandbox(id).await?;
        self.registry.add_sandbox(sandbox);
        self.registry.add_infra_container(infra);
        Ok(())
    }

    async fn load_container(&self, id: &str) -> Result<()> {
        let container = self.storage.load_container(id).await?;
        if self.registry.get_sandbox(&container.sandbox_id).is_none() {
            return Err(BerthError::ContainerError(format!(
                "sandbox {} not found for container {}",
                container.sandbox_id, id
            )));
        }
        self.registry.add_container(container);
        Ok(())
    }
}
