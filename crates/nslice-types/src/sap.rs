//! Service access point identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 802.1Q tag carried by a SAP (1-4094).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// # Errors
    ///
    /// Returns [`ParseError::InvalidVlanId`] outside 1-4094; 0 and 4095 are
    /// reserved by 802.1Q.
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// A port plus dot1q tag, written `<port>:<vlan>` on SR OS.
///
/// ```
/// use nslice_types::SapId;
///
/// let sap: SapId = "1/1/c1/1:701".parse().unwrap();
/// assert_eq!(sap.port(), "1/1/c1/1");
/// assert_eq!(sap.vlan().as_u16(), 701);
/// assert_eq!(sap.interface_name(), "1/1/c1/1.701");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SapId {
    port: String,
    vlan: VlanId,
}

impl SapId {
    pub fn new(port: impl Into<String>, vlan: u16) -> Result<Self, ParseError> {
        let port = port.into();
        let trimmed = port.trim();
        if trimmed.is_empty() || trimmed.contains(':') || trimmed.contains(char::is_whitespace) {
            return Err(ParseError::InvalidSapId(port));
        }
        Ok(Self {
            port: trimmed.to_string(),
            vlan: VlanId::new(vlan)?,
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn vlan(&self) -> VlanId {
        self.vlan
    }

    /// Name of the routed interface bound to this SAP in a VPRN.
    pub fn interface_name(&self) -> String {
        format!("{}.{}", self.port, self.vlan)
    }
}

impl fmt::Display for SapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.port, self.vlan)
    }
}

impl FromStr for SapId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, vlan) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidSapId(s.to_string()))?;
        let vlan: u16 = vlan.parse().map_err(|_| ParseError::InvalidSapId(s.to_string()))?;
        SapId::new(port, vlan)
    }
}
