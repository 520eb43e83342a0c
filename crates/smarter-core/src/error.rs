//! Error types for the smarter device manager

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the smarter device manager
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A scan root could not be opened
    #[error("Failed to scan {}: {source}", path.display())]
    Scan {
        /// Root directory being scanned
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A configured match pattern is not a valid regular expression
    #[error("Invalid device match pattern '{pattern}': {source}")]
    Pattern {
        /// Pattern as written in the configuration
        pattern: String,
        /// Regex compilation error
        #[source]
        source: regex::Error,
    },

    /// The plugin socket could not be bound
    #[error("Failed to bind plugin socket {}: {source}", path.display())]
    Bind {
        /// Socket path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The plugin server never accepted the readiness connection
    #[error("Plugin server on {} not ready after {timeout:?}", path.display())]
    SelfCheckTimeout {
        /// Socket path
        path: PathBuf,
        /// Deadline that expired
        timeout: Duration,
    },

    /// Registration with the kubelet failed
    #[error("Failed to register '{resource}' with kubelet: {message}")]
    Registration {
        /// Resource name being registered
        resource: String,
        /// Failure reason
        message: String,
    },

    /// An allocation request named a device that is not advertised
    #[error("invalid allocation request for '{resource}': unknown device: {device_id}")]
    UnknownDevice {
        /// Resource name
        resource: String,
        /// Offending device id
        device_id: String,
    },

    /// A stale socket file could not be removed
    #[error("Failed to remove socket {}: {source}", path.display())]
    Cleanup {
        /// Socket path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a registration error
    pub fn registration(resource: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Registration {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error is fatal at startup (bad inventory or configuration)
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::Scan { .. } | Error::Pattern { .. } | Error::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_fatal_classification() {
        let err = Error::Scan {
            path: PathBuf::from("/nonexistent"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_startup_fatal());

        let err = Error::registration("smarter-devices/ttyUSB0", "connection refused");
        assert!(!err.is_startup_fatal());
    }

    #[test]
    fn test_unknown_device_message() {
        let err = Error::UnknownDevice {
            resource: "smarter-devices/snd".to_string(),
            device_id: "42".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid allocation request for 'smarter-devices/snd': unknown device: 42"
        );
    }

    #[test]
    fn test_pattern_error_keeps_pattern() {
        let source = regex::Regex::new("tty[").unwrap_err();
        let err = Error::Pattern {
            pattern: "tty[".to_string(),
            source,
        };
        assert!(err.to_string().contains("tty["));
        assert!(err.is_startup_fatal());
    }
}
