//! OCI process-supervision collaborator.
//!
//! Process supervision itself is external; the server only asks it for the
//! current status of a tracked container. `ExitFileRuntime` implements the
//! query against the shim's exit-file protocol: when a container's process
//! terminates, the shim writes the exit code into a file named after the
//! container ID under the exit-notification directory.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use berth_core::error::{BerthError, Result};

use crate::container::{Container, ContainerState};

/// Refreshed process status for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Observed lifecycle state.
    pub state: ContainerState,
    /// Exit code, meaningful only when exited.
    pub exit_code: i32,
    /// Finish timestamp in nanoseconds, meaningful only when exited.
    pub finished_at: i64,
}

/// Capability interface over the process-supervision layer.
#[async_trait]
pub trait OciRuntime: Send + Sync {
    /// Query the current status of a container's process.
    async fn update_status(&self, container: &Container) -> Result<ProcessStatus>;
}

/// Exit-file-backed status source.
#[derive(Debug)]
pub struct ExitFileRuntime {
    exits_dir: PathBuf,
}

impl ExitFileRuntime {
    pub fn new(exits_dir: impl Into<PathBuf>) -> Self {
        Self {
            exits_dir: exits_dir.into(),
        }
    }
}

#[async_trait]
impl OciRuntime for ExitFileRuntime {
    async fn update_status(&self, container: &Container) -> Result<ProcessStatus> {
        let exit_file = self.exits_dir.join(&container.id);

        let contents = match tokio::fs::read_to_string(&exit_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // No exit marker: the process is still up.
                return Ok(ProcessStatus {
                    state: container.state,
                    exit_code: container.exit_code,
                    finished_at: container.finished_at,
                });
            }
            Err(e) => {
                return Err(BerthError::RuntimeError(format!(
                    "failed to read exit file {}: {}",
                    exit_file.display(),
                    e
                )))
            }
        };

        let exit_code: i32 = contents.trim().parse().map_err(|e| {
            BerthError::RuntimeError(format!(
                "malformed exit file {}: {}",
                exit_file.display(),
                e
            ))
        })?;

        let finished_at = tokio::fs::metadata(&exit_file)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(|t| DateTime::<Utc>::from(t).timestamp_nanos_opt().unwrap_or(0))
            .unwrap_or_else(|| Utc::now().timestamp_nanos_opt().unwrap_or(0));

        Ok(ProcessStatus {
            state: ContainerState::Exited,
            exit_code,
            finished_at,
        })
    }
}
