//! Shutdown coordination.
//!
//! A host shutdown and a service restart must tear down differently: on a
//! real host shutdown every sandbox is force-stopped, while an ordinary
//! restart leaves them running so the replacement process can reattach via
//! restoration. The discriminator is a marker file the host's shutdown
//! hooks create; the coordinator consults it both at construction and at
//! `shutdown`.

use std::path::Path;

use berth_core::error::Result;

use crate::server::Server;

impl Server {
    /// Shut the server down: honor the shutdown marker, then release the
    /// storage collaborator's resources.
    pub async fn shutdown(&self) -> Result<()> {
        self.cleanup_sandboxes_on_shutdown().await;
        self.storage.shutdown().await
    }

    /// Force-stop all sandboxes if the shutdown marker is present, then
    /// remove the marker. Without the marker this is a no-op.
    pub(crate) async fn cleanup_sandboxes_on_shutdown(&self) {
        let marker = &self.config.shutdown_marker;
        if !marker_present(marker) {
            return;
        }

        tracing::debug!("shutting down all sandboxes, on shutdown");
        self.stop_all_pod_sandboxes().await;
        if let Err(e) = std::fs::remove_file(marker) {
            tracing::warn!(
                marker = %marker.display(),
                error = %e,
                "Failed to remove shutdown marker"
            );
        }
    }
}

/// Whether the shutdown marker exists.
///
/// Stat errors other than not-found are logged and treated as absent: an
/// unreadable marker must not tear down running workloads.
pub(crate) fn marker_present(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(
                marker = %path.display(),
                error = %e,
                "Could not stat shutdown marker, treating as absent"
            );
            false
        }
    }
}
