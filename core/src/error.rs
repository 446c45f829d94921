use thiserror::Error;

/// Berth error types
#[derive(Error, Debug)]
pub enum BerthError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Storage collaborator error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// OCI runtime collaborator error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Network plugin error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Sandbox lookup or lifecycle error
    #[error("Sandbox error: {0}")]
    SandboxError(String),

    /// Container lookup or lifecycle error
    #[error("Container error: {0}")]
    ContainerError(String),

    /// Malformed identity-mapping entry
    #[error("invalid ID mapping {token:?}: {message}")]
    IdMapError { token: String, message: String },

    /// Transport security error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Streaming endpoint error
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Filesystem watch error
    #[error("Watch error: {0}")]
    WatchError(String),

    /// Host port reservation error
    #[error("Host port error: {0}")]
    HostPortError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for BerthError {
    fn from(err: serde_json::Error) -> Self {
        BerthError::SerializationError(err.to_string())
    }
}

/// Result type alias for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = BerthError::ConfigError("missing stream port".to_string());
        assert_eq!(error.to_string(), "Configuration error: missing stream port");
    }

    #[test]
    fn test_storage_error_display() {
        let error = BerthError::StorageError("metadata not found".to_string());
        assert_eq!(error.to_string(), "Storage error: metadata not found");
    }

    #[test]
    fn test_idmap_error_display() {
        let error = BerthError::IdMapError {
            token: "0:1000".to_string(),
            message: "mapping requires 3 fields".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid ID mapping \"0:1000\": mapping requires 3 fields"
        );
    }

    #[test]
    fn test_sandbox_error_display() {
        let error = BerthError::SandboxError("specified pod sandbox not found: abc".to_string());
        assert_eq!(
            error.to_string(),
            "Sandbox error: specified pod sandbox not found: abc"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let berth_error: BerthError = io_error.into();
        assert!(matches!(berth_error, BerthError::IoError(_)));
        assert!(berth_error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_str = "{ invalid json }";
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str(json_str);
        let json_error = result.unwrap_err();
        let berth_error: BerthError = json_error.into();
        assert!(matches!(berth_error, BerthError::SerializationError(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(BerthError::Other("test error".to_string()))
        }

        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_debug() {
        let error = BerthError::WatchError("source closed".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("WatchError"));
    }
}
