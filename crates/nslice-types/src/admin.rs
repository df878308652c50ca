//! Administrative state of a service.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative state of a service or SAP.
///
/// Devices report `admin-state` as the literal strings `enable`/`disable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Service is administratively enabled (default for new services).
    #[default]
    Enable,
    /// Service is administratively disabled.
    Disable,
}

impl AdminState {
    /// Returns the device-side value.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdminState::Enable => "enable",
            AdminState::Disable => "disable",
        }
    }

    /// Returns true if the service is administratively enabled.
    pub const fn is_enabled(&self) -> bool {
        matches!(self, AdminState::Enable)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enable" => Ok(AdminState::Enable),
            "disable" => Ok(AdminState::Disable),
            _ => Err(ParseError::InvalidAdminState(s.to_string())),
        }
    }
}
