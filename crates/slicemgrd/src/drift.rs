//! Drift detection.
//!
//! Compares a device's live values against the last applied config for the
//! paths the service owns. Nothing outside those paths is ever looked at,
//! apart from the service's own `oper-state` under `/state`.

use crate::gateway::{DeviceSessions, GatewayError, GetResult};
use crate::intended::{ConfigPath, ConfigValue, DeviceConfig};
use crate::record::OperState;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A managed path whose live value differs from the applied one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftedPath {
    pub path: ConfigPath,
    pub expected: ConfigValue,
    /// `None` when the path is missing on the device.
    pub observed: Option<ConfigValue>,
}

/// Result of one device check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReport {
    InSync,
    Drifted(Vec<DriftedPath>),
    /// The device could not be read. Carries no information about drift.
    Unknown(GatewayError),
}

impl DriftReport {
    pub fn is_drifted(&self) -> bool {
        matches!(self, DriftReport::Drifted(_))
    }

    /// Drifted paths, empty unless [`DriftReport::Drifted`].
    pub fn paths(&self) -> Vec<ConfigPath> {
        match self {
            DriftReport::Drifted(paths) => paths.iter().map(|d| d.path.clone()).collect(),
            _ => Vec::new(),
        }
    }
}

/// State path carrying a service's operational state.
pub fn oper_state_path(service_id: u32) -> ConfigPath {
    ConfigPath::new("/state/service")
        .keyed("id", "service-id", service_id)
        .child("oper-state")
}

/// Value a device reports when a leaf is left at its default.
fn implicit_default(path: &ConfigPath) -> Option<&'static str> {
    match path.leaf_name() {
        "admin-state" => Some("disable"),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Structural comparison of an expected value with what the device reports.
pub fn values_match(path: &ConfigPath, expected: &ConfigValue, observed: Option<&ConfigValue>) -> bool {
    let Some(observed) = observed else {
        return match (expected, implicit_default(path)) {
            (ConfigValue::Text(e), Some(default)) => e.trim() == default,
            _ => false,
        };
    };

    match (expected, observed) {
        (ConfigValue::Present, _) => true,
        (ConfigValue::Text(e), ConfigValue::Text(o)) => e.trim() == o.trim(),
        (ConfigValue::Text(e), ConfigValue::Number(n)) => e.trim() == n.to_string(),
        (ConfigValue::Text(e), ConfigValue::Bool(b)) => parse_bool(e) == Some(*b),
        (ConfigValue::Number(e), ConfigValue::Number(o)) => e == o,
        (ConfigValue::Number(e), ConfigValue::Text(o)) => o.trim().parse::<u64>().ok() == Some(*e),
        (ConfigValue::Bool(e), ConfigValue::Bool(o)) => e == o,
        (ConfigValue::Bool(e), ConfigValue::Text(o)) => parse_bool(o) == Some(*e),
        _ => false,
    }
}

/// Diffs the applied config against a `Get` result.
///
/// Output follows the applied config's creation order.
pub fn diff(applied: &DeviceConfig, observed: &GetResult) -> Vec<DriftedPath> {
    let live: HashMap<&ConfigPath, Option<&ConfigValue>> =
        observed.iter().map(|(p, v)| (p, v.as_ref())).collect();

    applied
        .entries()
        .iter()
        .filter_map(|entry| {
            let observed = live.get(&entry.path).copied().flatten();
            (!values_match(&entry.path, &entry.value, observed)).then(|| DriftedPath {
                path: entry.path.clone(),
                expected: entry.value.clone(),
                observed: observed.cloned(),
            })
        })
        .collect()
}

/// Reads devices and reports drift.
pub struct DriftDetector {
    sessions: Arc<DeviceSessions>,
    fanout: usize,
}

impl DriftDetector {
    pub fn new(sessions: Arc<DeviceSessions>) -> Self {
        Self {
            sessions,
            fanout: crate::orchestrator::DEFAULT_FANOUT,
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    /// Checks one device against its last applied config.
    #[instrument(skip(self, applied), fields(paths = applied.len()))]
    pub async fn detect(&self, router: &str, applied: &DeviceConfig) -> DriftReport {
        if applied.is_empty() {
            return DriftReport::InSync;
        }
        let observed = {
            let mut lease = self.sessions.lease(router).await;
            lease.get(&applied.paths()).await
        };
        match observed {
            Ok(observed) => {
                let drifted = diff(applied, &observed);
                if drifted.is_empty() {
                    DriftReport::InSync
                } else {
                    debug!(drifted = drifted.len(), "drift found");
                    DriftReport::Drifted(drifted)
                }
            }
            Err(e) => {
                debug!(error = %e, "device unreadable");
                DriftReport::Unknown(e)
            }
        }
    }

    /// Reads the operational state of `service_id` on one device. A device
    /// that cannot be read, or has no value, reads as `Unknown`.
    #[instrument(skip(self))]
    pub async fn oper_state(&self, router: &str, service_id: u32) -> OperState {
        let path = oper_state_path(service_id);
        let observed = {
            let mut lease = self.sessions.lease(router).await;
            lease.get(std::slice::from_ref(&path)).await
        };
        let value = match observed {
            Ok(observed) => observed.into_iter().find(|(p, _)| *p == path).and_then(|(_, v)| v),
            Err(e) => {
                debug!(error = %e, "oper-state unreadable");
                return OperState::Unknown;
            }
        };
        match value {
            Some(ConfigValue::Text(state)) => OperState::from_leaf(&state),
            Some(other) => {
                debug!(value = ?other, "unexpected oper-state value");
                OperState::Down
            }
            None => OperState::Unknown,
        }
    }

    /// Reads the operational state on every router concurrently.
    pub async fn oper_states<'a>(
        &'a self,
        routers: impl IntoIterator<Item = &'a String>,
        service_id: u32,
    ) -> BTreeMap<String, OperState> {
        let pending: Vec<BoxFuture<'a, (String, OperState)>> = routers
            .into_iter()
            .map(|router| {
                async move { (router.clone(), self.oper_state(router, service_id).await) }.boxed()
            })
            .collect();
        stream::iter(pending)
            .buffer_unordered(self.fanout)
            .collect()
            .await
    }

    /// Checks every device concurrently.
    pub async fn detect_all(&self, applied: &BTreeMap<String, DeviceConfig>) -> BTreeMap<String, DriftReport> {
        let pending: Vec<BoxFuture<'_, (String, DriftReport)>> = applied
            .iter()
            .map(|(router, config)| {
                async move { (router.clone(), self.detect(router, config).await) }.boxed()
            })
            .collect();
        stream::iter(pending)
            .buffer_unordered(self.fanout)
            .collect()
            .await
    }
}
