//! Persistent container storage collaborator.
//!
//! The server core drives storage through the `ContainerStorage` capability
//! interface; `DirStorage` is the bundled implementation, keeping one
//! directory per entity with JSON records and atomic writes (write to a tmp
//! file, then rename).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use berth_core::error::{BerthError, Result};

use crate::container::Container;
use crate::sandbox::Sandbox;

/// Persisted per-container metadata, read once per entity during restoration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Entity name.
    pub name: String,
    /// Owning pod identifier.
    pub pod_id: String,
    /// Whether this entity is a pod sandbox (vs. an ordinary container).
    pub is_pod: bool,
}

/// Capability interface over the persistent container store.
#[async_trait]
pub trait ContainerStorage: Send + Sync {
    /// Enumerate the IDs of all persisted container-like entities.
    async fn list_entities(&self) -> Result<Vec<String>>;

    /// Fetch the persisted metadata for one entity.
    async fn metadata(&self, id: &str) -> Result<ContainerMetadata>;

    /// Reconstruct a sandbox record and its infra container from storage.
    async fn load_sandbox(&self, id: &str) -> Result<(Sandbox, Container)>;

    /// Reconstruct a workload container record from storage.
    async fn load_container(&self, id: &str) -> Result<Container>;

    /// Persist a container's refreshed runtime state.
    async fn persist_state(&self, container: &Container) -> Result<()>;

    /// Release storage resources on server shutdown.
    async fn shutdown(&self) -> Result<()>;
}

const METADATA_FILE: &str = "metadata.json";
const SANDBOX_FILE: &str = "sandbox.json";
const CONTAINER_FILE: &str = "container.json";

/// Directory-backed container store.
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            BerthError::StorageError(format!(
                "failed to create storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Persist a new sandbox together with its infra container record.
    pub async fn store_sandbox(&self, sandbox: &Sandbox, infra: &Container) -> Result<()> {
        let metadata = ContainerMetadata {
            name: sandbox.name.clone(),
            pod_id: sandbox.id.clone(),
            is_pod: true,
        };
        self.write_json(&sandbox.id, METADATA_FILE, &metadata).await?;
        self.write_json(&sandbox.id, SANDBOX_FILE, sandbox).await?;
        self.write_json(&sandbox.id, CONTAINER_FILE, infra).await
    }

    /// Persist a new workload container record.
    pub async fn store_container(&self, container: &Container) -> Result<()> {
        let metadata = ContainerMetadata {
            name: container.name.clone(),
            pod_id: container.sandbox_id.clone(),
            is_pod: false,
        };
        self.write_json(&container.id, METADATA_FILE, &metadata).await?;
        self.write_json(&container.id, CONTAINER_FILE, container).await
    }

    /// Remove every record for an entity.
    pub async fn delete_entity(&self, id: &str) -> Result<()> {
        let dir = self.root.join(id);
        tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
            BerthError::StorageError(format!("failed to remove {}: {}", dir.display(), e))
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, id: &str, file: &str) -> Result<T> {
        let path = self.root.join(id).join(file);
        let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
            BerthError::StorageError(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            BerthError::StorageError(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    async fn write_json<T: Serialize>(&self, id: &str, file: &str, value: &T) -> Result<()> {
        let dir = self.root.join(id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            BerthError::StorageError(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let json = serde_json::to_string_pretty(value).map_err(|e| {
            BerthError::StorageError(format!("failed to serialize {}: {}", file, e))
        })?;

        // Atomic write: write to tmp, then rename
        let path = dir.join(file);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
            BerthError::StorageError(format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            BerthError::StorageError(format!(
                "failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl ContainerStorage for DirStorage {
    async fn list_entities(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            BerthError::StorageError(format!(
                "failed to read storage root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            BerthError::StorageError(format!("failed to enumerate entities: {}", e))
        })? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn metadata(&self, id: &str) -> Result<ContainerMetadata> {
        self.read_json(id, METADATA_FILE).await
    }

    async fn load_sandbox(&self, id: &str) -> Result<(Sandbox, Container)> {
        let sandbox: Sandbox = self.read_json(id, SANDBOX_FILE).await?;
        let infra: Container = self.read_json(id, CONTAINER_FILE).await?;
        Ok((sandbox, infra))
    }

    async fn load_container(&self, id: &str) -> Result<Container> {
        self.read_json(id, CONTAINER_FILE).await
    }

    async fn persist_state(&self, container: &Container) -> Result<()> {
        self.write_json(&container.id, CONTAINER_FILE, container).await
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::debug!(root = %self.root.display(), "storage shut down");
        Ok(())
    }
}
