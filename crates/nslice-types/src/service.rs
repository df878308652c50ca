//! Service flavour definitions.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of network service carried by a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    /// Virtual Private LAN Service (multipoint bridged domain).
    #[serde(rename = "VPLS")]
    Vpls,
    /// Virtual Private Routed Network (L3 VPN).
    #[serde(rename = "VPRN")]
    Vprn,
    /// Ethernet pseudowire (point-to-point cross-connect).
    #[serde(rename = "ePipe")]
    Epipe,
}

impl ServiceType {
    /// Returns the list name used under `/configure/service`.
    pub const fn model_name(&self) -> &'static str {
        match self {
            ServiceType::Vpls => "vpls",
            ServiceType::Vprn => "vprn",
            ServiceType::Epipe => "epipe",
        }
    }

    /// Returns true if the service binds SDPs between devices.
    ///
    /// VPRN services resolve their tunnels with auto-bind instead.
    pub const fn uses_sdp(&self) -> bool {
        matches!(self, ServiceType::Vpls | ServiceType::Epipe)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::Vpls => "VPLS",
            ServiceType::Vprn => "VPRN",
            ServiceType::Epipe => "ePipe",
        };
        f.write_str(s)
    }
}

impl FromStr for ServiceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vpls" => Ok(ServiceType::Vpls),
            "vprn" => Ok(ServiceType::Vprn),
            "epipe" => Ok(ServiceType::Epipe),
            _ => Err(ParseError::InvalidServiceType(s.to_string())),
        }
    }
}

/// How a VPLS binds its SDPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SdpBindingKind {
    /// Full mesh of SDP bindings (split horizon between them).
    #[default]
    MeshSdp,
    /// Spoke SDP bindings.
    SpokeSdp,
}

impl SdpBindingKind {
    /// Returns the list name of the binding in the service model.
    pub const fn model_name(&self) -> &'static str {
        match self {
            SdpBindingKind::MeshSdp => "mesh-sdp",
            SdpBindingKind::SpokeSdp => "spoke-sdp",
        }
    }
}

impl FromStr for SdpBindingKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mesh-sdp" => Ok(SdpBindingKind::MeshSdp),
            "spoke-sdp" => Ok(SdpBindingKind::SpokeSdp),
            _ => Err(ParseError::InvalidSdpBindingKind(s.to_string())),
        }
    }
}
