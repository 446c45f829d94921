//! Container entity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container has been created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container has exited.
    Exited,
}

/// Represents a container inside a pod sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Unique container identifier.
    pub id: String,
    /// Owning sandbox identifier.
    pub sandbox_id: String,
    /// Container name.
    pub name: String,
    /// Current state.
    pub state: ContainerState,
    /// Creation timestamp in nanoseconds.
    pub created_at: i64,
    /// Start timestamp in nanoseconds (0 if not started).
    pub started_at: i64,
    /// Finish timestamp in nanoseconds (0 if not finished).
    pub finished_at: i64,
    /// Exit code (0 if not exited).
    pub exit_code: i32,
    /// Container labels.
    pub labels: HashMap<String, String>,
    /// Container annotations.
    pub annotations: HashMap<String, String>,
}

impl Container {
    /// Whether this container's process is still tracked as alive.
    pub fn is_alive(&self) -> bool {
        matches!(self.state, ContainerState::Created | ContainerState::Running)
    }
}
