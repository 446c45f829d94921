//! Shared in-memory sandbox/container registry.
//!
//! The registry is internally safe for concurrent lookup/insert/remove; the
//! server and its background monitors share it by `Arc` and never duplicate
//! entity ownership. A prefix index over sandbox IDs supports the partial-ID
//! lookups used by request handlers.

use std::collections::BTreeSet;

use dashmap::DashMap;
use parking_lot::RwLock;

use berth_core::error::{BerthError, Result};

use crate::container::Container;
use crate::sandbox::Sandbox;

/// Concurrent registry of tracked sandboxes and containers.
#[derive(Debug, Default)]
pub struct Registry {
    sandboxes: DashMap<String, Sandbox>,
    containers: DashMap<String, Container>,
    /// Infra containers, keyed by their sandbox ID.
    infra_containers: DashMap<String, Container>,
    /// Sorted sandbox IDs for prefix resolution.
    sandbox_ids: RwLock<BTreeSet<String>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sandboxes ────────────────────────────────────────────────────

    /// Track a sandbox.
    pub fn add_sandbox(&self, sandbox: Sandbox) {
        self.sandbox_ids.write().insert(sandbox.id.clone());
        self.sandboxes.insert(sandbox.id.clone(), sandbox);
    }

    /// Get a sandbox snapshot by exact ID.
    pub fn get_sandbox(&self, id: &str) -> Option<Sandbox> {
        self.sandboxes.get(id).map(|e| e.value().clone())
    }

    /// Stop tracking a sandbox.
    pub fn remove_sandbox(&self, id: &str) -> Option<Sandbox> {
        self.sandbox_ids.write().remove(id);
        self.sandboxes.remove(id).map(|(_, sb)| sb)
    }

    /// Snapshot of every tracked sandbox.
    pub fn list_sandboxes(&self) -> Vec<Sandbox> {
        self.sandboxes.iter().map(|e| e.value().clone()).collect()
    }

    /// Mutate a tracked sandbox in place, returning the updated snapshot.
    pub fn update_sandbox(
        &self,
        id: &str,
        f: impl FnOnce(&mut Sandbox),
    ) -> Option<Sandbox> {
        self.sandboxes.get_mut(id).map(|mut e| {
            f(e.value_mut());
            e.value().clone()
        })
    }

    /// Resolve a full sandbox ID from a unique prefix.
    ///
    /// An exact match always wins; otherwise the prefix must match exactly
    /// one tracked sandbox.
    pub fn resolve_sandbox_id(&self, prefix: &str) -> Result<String> {
        let index = self.sandbox_ids.read();
        if index.contains(prefix) {
            return Ok(prefix.to_string());
        }

        let mut matches = index
            .range(prefix.to_string()..)
            .take_while(|id| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            (Some(_), Some(_)) => Err(BerthError::SandboxError(format!(
                "pod sandbox ID {} is ambiguous",
                prefix
            ))),
            (None, _) => Err(BerthError::SandboxError(format!(
                "pod sandbox with ID starting with {} not found",
                prefix
            ))),
        }
    }

    // ── Containers ───────────────────────────────────────────────────

    /// Track a workload container.
    pub fn add_container(&self, container: Container) {
        self.containers.insert(container.id.clone(), container);
    }

    /// Get a workload container snapshot by exact ID.
    pub fn get_container(&self, id: &str) -> Option<Container> {
        self.containers.get(id).map(|e| e.value().clone())
    }

    /// Stop tracking a workload container.
    pub fn remove_container(&self, id: &str) -> Option<Container> {
        self.containers.remove(id).map(|(_, c)| c)
    }

    /// Snapshot of workload containers, optionally restricted to a sandbox.
    pub fn list_containers(&self, sandbox_id: Option<&str>) -> Vec<Container> {
        self.containers
            .iter()
            .filter(|e| match sandbox_id {
                Some(sid) => e.value().sandbox_id == sid,
                None => true,
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Mutate a tracked workload container, returning the updated snapshot.
    pub fn update_container(
        &self,
        id: &str,
        f: impl FnOnce(&mut Container),
    ) -> Option<Container> {
        self.containers.get_mut(id).map(|mut e| {
            f(e.value_mut());
            e.value().clone()
        })
    }

    // ── Infra containers ─────────────────────────────────────────────

    /// Track a sandbox's infra container.
    pub fn add_infra_container(&self, container: Container) {
        self.infra_containers
            .insert(container.sandbox_id.clone(), container);
    }

    /// Get the infra container holding a sandbox's namespaces open.
    pub fn get_infra_container(&self, sandbox_id: &str) -> Option<Container> {
        self.infra_containers
            .get(sandbox_id)
            .map(|e| e.value().clone())
    }

    /// Stop tracking a sandbox's infra container.
    pub fn remove_infra_container(&self, sandbox_id: &str) -> Option<Container> {
        self.infra_containers.remove(sandbox_id).map(|(_, c)| c)
    }

    /// Mutate a tracked infra container, returning the updated snapshot.
    pub fn update_infra_container(
        &self,
        sandbox_id: &str,
        f: impl FnOnce(&mut Container),
    ) -> Option<Container> {
        self.infra_containers.get_mut(sandbox_id).map(|mut e| {
            f(e.value_mut());
            e.value().clone()
        })
    }
}
