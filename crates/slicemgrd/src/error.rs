//! Error types for the slice manager.
//!
//! Library errors are `thiserror` enums; the binary wraps them in `anyhow`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for slice manager operations.
pub type Result<T> = std::result::Result<T, SliceMgrError>;

/// Process-level failures (configuration, manifests, status output).
#[derive(Debug, Error)]
pub enum SliceMgrError {
    /// Config file did not parse, or a field failed validation.
    #[error("invalid config {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("status of {key}: {message}")]
    Status { key: String, message: String },

    /// The orch dropped its receiver.
    #[error("event queue closed")]
    QueueClosed,
}

impl SliceMgrError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn status(key: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Status {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Classification attached to every endpoint-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The spec violates a structural rule; needs a spec change.
    InvalidSpec,
    /// The device could not be reached or authenticated.
    Connection,
    /// The device answered with an error.
    Transport,
    /// A non-atomic write failed after some paths were written.
    PartialApplyFailure,
    /// The device could not be read during a drift check.
    DriftUnknown,
    /// Managed paths diverged from the last applied config.
    ConfigDrift,
    /// Teardown of the service failed on the device.
    DeleteFailure,
}

impl ErrorKind {
    /// Returns true if retrying without a spec change may help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::InvalidSpec)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidSpec => "InvalidSpec",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::PartialApplyFailure => "PartialApplyFailure",
            ErrorKind::DriftUnknown => "DriftUnknown",
            ErrorKind::ConfigDrift => "ConfigDrift",
            ErrorKind::DeleteFailure => "DeleteFailure",
        };
        f.write_str(s)
    }
}

/// Error attached to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EndpointError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SliceMgrError::invalid_config("reconcile.fanout", "must be > 0");
        assert_eq!(err.to_string(), "invalid config reconcile.fanout: must be > 0");

        let err = SliceMgrError::io(
            "/tmp/status",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "/tmp/status: denied");
    }

    #[test]
    fn test_endpoint_error_display() {
        let err = EndpointError::new(ErrorKind::Connection, "connection refused");
        assert_eq!(err.to_string(), "ConnectionError: connection refused");
    }

    #[test]
    fn test_error_kind_retryable() {
        assert!(!ErrorKind::InvalidSpec.is_retryable());
        assert!(ErrorKind::DeleteFailure.is_retryable());
        assert!(ErrorKind::Transport.is_retryable());
    }
}
