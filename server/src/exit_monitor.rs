//! Exit-event reconciler.
//!
//! A background task watching the exit-notification directory. Each run
//! moves through two states: watching, entered once the watch source is
//! established, and stopped, reached on the external close signal or a
//! watch-source error. Events are handled one at a time, in delivery order.

use std::sync::Arc;

use berth_core::signal::CloseNotifier;
use berth_runtime::container::Container;
use berth_runtime::oci::OciRuntime;
use berth_runtime::registry::Registry;
use berth_runtime::storage::ContainerStorage;
use berth_runtime::watch::{EventSource, WatchEvent};

use crate::metrics;

/// Reconciles exit notifications with tracked container state.
pub struct ExitMonitor {
    registry: Arc<Registry>,
    runtime: Arc<dyn OciRuntime>,
    storage: Arc<dyn ContainerStorage>,
    close: CloseNotifier,
}

impl ExitMonitor {
    pub fn new(
        registry: Arc<Registry>,
        runtime: Arc<dyn OciRuntime>,
        storage: Arc<dyn ContainerStorage>,
        close: CloseNotifier,
    ) -> Self {
        Self {
            registry,
            runtime,
            storage,
            close,
        }
    }

    /// Process events until the close signal fires or the source dies.
    ///
    /// A watch-source error terminates this run; no reattach is attempted
    /// here, the close signal is the supervisor's indicator.
    pub async fn run(self, mut source: impl EventSource) {
        tracing::info!("Exit monitor watching");
        loop {
            tokio::select! {
                _ = self.close.wait() => {
                    tracing::debug!("closing exit monitor");
                    break;
                }
                event = source.next_event() => match event {
                    Some(Ok(WatchEvent::Created(name))) => self.handle_exit(&name).await,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Watch source failed, exit monitor terminating");
                        break;
                    }
                    None => {
                        tracing::warn!("Watch source closed, exit monitor terminating");
                        break;
                    }
                }
            }
        }
    }

    /// Treat a created entry's base name as a candidate container ID.
    async fn handle_exit(&self, id: &str) {
        tracing::debug!(id = %id, "container or sandbox exit event");

        if let Some(container) = self.registry.get_container(id) {
            self.refresh_container(&container, false).await;
        } else if let Some(sandbox) = self.registry.get_sandbox(id) {
            match self.registry.get_infra_container(&sandbox.id) {
                Some(infra) => self.refresh_container(&infra, true).await,
                None => {
                    tracing::debug!(sandbox_id = %sandbox.id, "sandbox has no tracked infra container");
                }
            }
        } else {
            // A stale or foreign marker is not an error.
            metrics::EXIT_EVENTS.with_label_values(&["untracked"]).inc();
            tracing::debug!(id = %id, "exit event for untracked ID, ignoring");
        }
    }

    /// Refresh one container's status and persist the result.
    ///
    /// A failed refresh leaves the prior tracked state intact; one failure
    /// must not stop future events from being processed.
    async fn refresh_container(&self, container: &Container, infra: bool) {
        let status = match self.runtime.update_status(container).await {
            Ok(status) => status,
            Err(e) => {
                metrics::EXIT_EVENTS
                    .with_label_values(&["refresh_failed"])
                    .inc();
                tracing::warn!(
                    container_id = %container.id,
                    error = %e,
                    "Failed to update container status"
                );
                return;
            }
        };

        let apply = |c: &mut Container| {
            c.state = status.state;
            c.exit_code = status.exit_code;
            c.finished_at = status.finished_at;
        };
        let updated = if infra {
            self.registry
                .update_infra_container(&container.sandbox_id, apply)
        } else {
            self.registry.update_container(&container.id, apply)
        };

        let updated = match updated {
            Some(updated) => updated,
            // Removed by a handler between lookup and refresh.
            None => return,
        };

        metrics::EXIT_EVENTS.with_label_values(&["refreshed"]).inc();

        if let Err(e) = self.storage.persist_state(&updated).await {
            tracing::warn!(
                container_id = %updated.id,
                error = %e,
                "Failed to persist refreshed container state"
            );
        }
    }
}
