//! Device gateway abstraction.
//!
//! The wire transport (gNMI over gRPC) lives outside this crate. The
//! reconciler talks to devices only through [`DeviceGateway`], and reaches
//! the gateway only through [`DeviceSessions`], which serializes access per
//! router.

mod memory;
mod session;

pub use memory::MemoryGateway;
pub use session::{DeviceLease, DeviceSessions};

use crate::error::ErrorKind;
use crate::intended::{ConfigEntry, ConfigPath, ConfigValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default gNMI port.
pub const DEFAULT_GNMI_PORT: u16 = 57400;

/// Address of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl DeviceRef {
    /// A device reachable under its own name on the default port.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            address: name.clone(),
            name,
            port: DEFAULT_GNMI_PORT,
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.address, self.port)
    }
}

/// An open session to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub router: String,
    pub session_id: u64,
}

/// Model information reported by a device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Supported data models.
    pub models: Vec<String>,
    /// True if one `Set` carrying several paths is applied atomically.
    pub atomic_set: bool,
}

/// Acknowledgement of a `Set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAck {
    pub updated: usize,
    pub deleted: usize,
}

/// Values returned by a `Get`, one per requested path, in request order.
pub type GetResult = Vec<(ConfigPath, Option<ConfigValue>)>;

/// Errors reported by a device gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The device could not be reached.
    #[error("connection to {router} failed: {message}")]
    Connection { router: String, message: String },

    /// An operation did not complete in time.
    #[error("{operation} on {router} timed out")]
    Timeout { router: String, operation: String },

    /// The session broke while an operation was in flight.
    #[error("transport error on {router}: {message}")]
    Transport { router: String, message: String },

    /// The device refused the operation.
    #[error("{router} rejected {operation}: {message}")]
    Rejected {
        router: String,
        operation: String,
        message: String,
    },

    /// The router is not known to the gateway.
    #[error("unknown device {router}")]
    UnknownDevice { router: String },

    /// Credentials could not be resolved.
    #[error("no credentials for {router}: {message}")]
    Credentials { router: String, message: String },
}

impl GatewayError {
    pub fn connection(router: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            router: router.into(),
            message: message.into(),
        }
    }

    pub fn timeout(router: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            router: router.into(),
            operation: operation.into(),
        }
    }

    pub fn transport(router: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            router: router.into(),
            message: message.into(),
        }
    }

    pub fn rejected(
        router: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            router: router.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true for transient failures worth retrying within a cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::Transport { .. }
        )
    }

    /// Returns true if the cached session must be dropped.
    pub fn invalidates_session(&self) -> bool {
        self.is_retryable()
    }

    /// Endpoint-level classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::UnknownDevice { .. }
            | GatewayError::Credentials { .. } => ErrorKind::Connection,
            GatewayError::Transport { .. } | GatewayError::Rejected { .. } => ErrorKind::Transport,
        }
    }
}

/// Protocol client for one kind of device transport.
///
/// Every call may fail and may be slow. Callers never assume multi-path
/// atomicity beyond what [`Capabilities::atomic_set`] reports.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Opens an authenticated session.
    async fn connect(
        &self,
        device: &DeviceRef,
        credentials: &Credentials,
    ) -> Result<DeviceHandle, GatewayError>;

    /// Reads the current value of every path.
    async fn get(&self, handle: &DeviceHandle, paths: &[ConfigPath]) -> Result<GetResult, GatewayError>;

    /// Applies deletes, then updates.
    async fn set(
        &self,
        handle: &DeviceHandle,
        updates: &[ConfigEntry],
        deletes: &[ConfigPath],
    ) -> Result<SetAck, GatewayError>;

    /// Reports device capabilities.
    async fn capabilities(&self, handle: &DeviceHandle) -> Result<Capabilities, GatewayError>;
}

/// Username and password for a device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credential lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credentials for {router} not found")]
    NotFound { router: String },
}

/// External secret lookup by router name.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, router: &str) -> Result<Credentials, CredentialError>;
}

/// Fixed credential table with an optional fallback entry.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    by_router: HashMap<String, Credentials>,
    fallback: Option<Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(mut self, router: impl Into<String>, credentials: Credentials) -> Self {
        self.by_router.insert(router.into(), credentials);
        self
    }

    pub fn with_fallback(mut self, credentials: Credentials) -> Self {
        self.fallback = Some(credentials);
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, router: &str) -> Result<Credentials, CredentialError> {
        self.by_router
            .get(router)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                router: router.to_string(),
            })
    }
}
