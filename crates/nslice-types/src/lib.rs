//! Common types for network slice reconciliation.
//!
//! This crate provides type-safe representations of the primitives shared by
//! the service compiler, the device gateway and the reconciler:
//!
//! - [`SapId`], [`VlanId`]: service access points and their dot1q tags
//! - [`ServiceType`]: Service flavours (VPLS, VPRN, ePipe)
//! - [`SdpBindingKind`]: Mesh or spoke SDP bindings
//! - [`AdminState`]: Administrative state of a service

mod admin;
mod sap;
mod service;

pub use admin::AdminState;
pub use service::{SdpBindingKind, ServiceType};
pub use sap::{SapId, VlanId};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid SAP id: '{0}' (expected <port>:<vlan>)")]
    InvalidSapId(String),

    #[error("invalid service type: {0}")]
    InvalidServiceType(String),

    #[error("invalid admin state: {0}")]
    InvalidAdminState(String),

    #[error("invalid SDP binding kind: {0}")]
    InvalidSdpBindingKind(String),
}
