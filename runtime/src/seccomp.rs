//! Seccomp profile loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use berth_core::error::{BerthError, Result};

/// A parsed seccomp profile document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeccompProfile {
    #[serde(rename = "defaultAction")]
    pub default_action: String,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub syscalls: Vec<SyscallRule>,
}

/// A rule covering a set of syscalls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallRule {
    #[serde(default)]
    pub names: Vec<String>,
    pub action: String,
}

/// Whether the host kernel advertises seccomp support.
pub fn is_enabled() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| status.lines().any(|line| line.starts_with("Seccomp:")))
        .unwrap_or(false)
}

/// Load and parse a seccomp profile document.
pub fn load_profile(path: impl AsRef<Path>) -> Result<SeccompProfile> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|e| {
        BerthError::ConfigError(format!(
            "opening seccomp profile ({}) failed: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&data)
        .map_err(|e| BerthError::ConfigError(format!("decoding seccomp profile failed: {}", e)))
}
