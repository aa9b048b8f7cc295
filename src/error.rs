//! WolfPaxos Error Types
//!
//! The consensus core never fails: stale or malformed protocol input is
//! dropped. These errors cover everything around it (configuration, storage,
//! transport).

use thiserror::Error;

/// Result type alias for WolfPaxos operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfPaxos error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Serialization errors
    #[error("Message serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(Error::ConnectionTimeout("node-2:7654".into()).is_retryable());
        assert!(Error::ConnectionFailed {
            address: "node-2:7654".into(),
            reason: "refused".into(),
        }
        .is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
        assert!(!Error::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ConnectionFailed {
            address: "node-9:7654".into(),
            reason: "refused".into(),
        };
        assert_eq!(err.to_string(), "Connection failed to node-9:7654: refused");
    }
}
