use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BerthError, Result};

/// Well-known default for the shutdown marker, relative to the state dir.
pub const SHUTDOWN_MARKER_FILE: &str = "berth.shutdown";

/// Server configuration
///
/// Immutable after construction; the server keeps a snapshot and never
/// re-reads it at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BerthConfig {
    /// Root state directory (persisted container records live below it)
    pub state_dir: PathBuf,

    /// Directory watched for container exit markers
    pub exits_dir: PathBuf,

    /// Directory holding per-container attach sockets
    pub attach_dir: PathBuf,

    /// Marker whose presence at startup signals a full host shutdown
    pub shutdown_marker: PathBuf,

    /// Directory holding per-sandbox network allocations
    pub network_state_dir: PathBuf,

    /// Streaming bind address (empty = pick an outbound-routable address)
    pub stream_address: String,

    /// Streaming TCP port, validated at server construction
    pub stream_port: String,

    /// Enable TLS on the streaming endpoint
    pub stream_enable_tls: bool,

    /// Path to the streaming TLS certificate (PEM)
    pub stream_tls_cert: PathBuf,

    /// Path to the streaming TLS private key (PEM)
    pub stream_tls_key: PathBuf,

    /// Optional CA bundle; when set, client certificates are required
    pub stream_tls_ca: Option<PathBuf>,

    /// Path to the seccomp profile document (JSON)
    pub seccomp_profile: PathBuf,

    /// AppArmor profile name for workload containers
    pub apparmor_profile: String,

    /// UID mappings, comma-separated `container:host:size` triples
    pub uid_mappings: String,

    /// GID mappings, comma-separated `container:host:size` triples
    pub gid_mappings: String,

    /// Port for the Prometheus metrics endpoint
    pub metrics_port: u16,
}

impl Default for BerthConfig {
    fn default() -> Self {
        let state_dir = PathBuf::from("/var/lib/berth");
        Self {
            shutdown_marker: state_dir.join(SHUTDOWN_MARKER_FILE),
            state_dir,
            exits_dir: PathBuf::from("/var/run/berth/exits"),
            attach_dir: PathBuf::from("/var/run/berth/attach"),
            network_state_dir: PathBuf::from("/var/lib/berth/networks"),
            stream_address: String::new(),
            stream_port: "10010".to_string(),
            stream_enable_tls: false,
            stream_tls_cert: PathBuf::from("/etc/berth/stream.crt"),
            stream_tls_key: PathBuf::from("/etc/berth/stream.key"),
            stream_tls_ca: None,
            seccomp_profile: PathBuf::from("/etc/berth/seccomp.json"),
            apparmor_profile: default_apparmor_profile(),
            uid_mappings: String::new(),
            gid_mappings: String::new(),
            metrics_port: 9090,
        }
    }
}

/// Name of the built-in AppArmor profile.
pub fn default_apparmor_profile() -> String {
    "berth-default".to_string()
}

impl BerthConfig {
    /// Load a configuration snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            BerthError::ConfigError(format!("failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            BerthError::ConfigError(format!("failed to parse config {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BerthConfig::default();
        assert_eq!(config.stream_port, "10010");
        assert!(!config.stream_enable_tls);
        assert!(config.stream_tls_ca.is_none());
        assert_eq!(config.apparmor_profile, "berth-default");
        assert_eq!(
            config.shutdown_marker,
            PathBuf::from("/var/lib/berth/berth.shutdown")
        );
    }

    #[test]
    fn test_config_round_trip() {
        let config = BerthConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BerthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stream_port, config.stream_port);
        assert_eq!(parsed.state_dir, config.state_dir);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = BerthConfig::default();
        config.stream_address = "192.0.2.1".to_string();
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = BerthConfig::from_file(&path).unwrap();
        assert_eq!(loaded.stream_address, "192.0.2.1");
    }

    #[test]
    fn test_from_file_missing() {
        let result = BerthConfig::from_file("/nonexistent/berth.json");
        assert!(matches!(result, Err(BerthError::ConfigError(_))));
    }

    #[test]
    fn test_from_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = BerthConfig::from_file(&path);
        assert!(matches!(result, Err(BerthError::ConfigError(_))));
    }
}
