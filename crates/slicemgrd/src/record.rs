//! Per-resource reconciliation state.
//!
//! A record holds the desired spec, the intended config compiled from it,
//! and what was last applied to each device. These are kept apart: healing
//! converges toward the applied intent, never toward observed state.

use crate::error::EndpointError;
use crate::intended::{ConfigPath, DeviceConfig, IntendedConfig};
use crate::types::{EndpointKey, ResourceKey, ServiceSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle phase of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Observed, not yet compiled.
    Pending,
    /// Apply in flight.
    Provisioning,
    /// Every endpoint applied, no drift.
    Active,
    /// Some endpoints failed or drifted.
    Degraded,
    /// Compile failure or every endpoint failed.
    Error,
    /// Teardown requested or in flight.
    Deleting,
}

impl Phase {
    /// Phases in which drift checks run.
    pub fn is_steady(&self) -> bool {
        matches!(self, Phase::Active | Phase::Degraded)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Provisioning => "Provisioning",
            Phase::Active => "Active",
            Phase::Degraded => "Degraded",
            Phase::Error => "Error",
            Phase::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// State of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointState {
    Applied,
    Failed,
    Drifted,
    /// The device could not be read on the last check.
    Unknown,
}

/// Service operational state reported by a device, apart from whether its
/// config converged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperState {
    Up,
    Down,
    /// Not read yet, or the device could not be reached.
    #[default]
    Unknown,
}

impl OperState {
    /// Reads the `oper-state` leaf: `up` is Up, any other value is Down.
    pub fn from_leaf(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("up") {
            OperState::Up
        } else {
            OperState::Down
        }
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperState::Up => "UP",
            OperState::Down => "DOWN",
            OperState::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub state: EndpointState,
    /// Last operational state read by a drift check.
    #[serde(default)]
    pub oper_state: OperState,
    pub last_error: Option<EndpointError>,
    /// Time `state` last changed.
    pub last_transition_time: DateTime<Utc>,
}

/// Config last written successfully to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedConfig {
    pub generation: u64,
    pub config: DeviceConfig,
}

/// Reconciliation state of one resource, owned by its own cycle.
#[derive(Debug, Clone)]
pub struct ReconciliationRecord {
    pub key: ResourceKey,
    /// Generation of `spec` and `intended`.
    pub generation: u64,
    pub phase: Phase,
    pub spec: ServiceSpec,
    pub intended: IntendedConfig,
    /// Last applied config per device. May hold devices no longer in
    /// `intended` whose removal has not succeeded yet.
    pub applied: BTreeMap<String, AppliedConfig>,
    pub endpoints: BTreeMap<EndpointKey, EndpointStatus>,
    /// Drifted paths awaiting a heal cycle.
    pub pending_heal: BTreeMap<String, Vec<ConfigPath>>,
    /// Devices still to be torn down, with everything placed on them.
    pub teardown: BTreeMap<String, DeviceConfig>,
    pub last_reconcile_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub deletion_requested: bool,
}

impl ReconciliationRecord {
    /// A record for a freshly observed resource.
    pub fn new(key: ResourceKey, spec: ServiceSpec) -> Self {
        Self {
            key,
            generation: 0,
            phase: Phase::Pending,
            spec,
            intended: IntendedConfig::new(),
            applied: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            pending_heal: BTreeMap::new(),
            teardown: BTreeMap::new(),
            last_reconcile_time: None,
            last_error: None,
            deletion_requested: false,
        }
    }

    /// Endpoint keys of the service spec that live on `router`.
    pub fn endpoints_on(&self, router: &str) -> Vec<EndpointKey> {
        self.spec
            .endpoints
            .iter()
            .filter(|ep| ep.router_name == router)
            .map(|ep| ep.key())
            .collect()
    }

    /// Updates one endpoint; the transition time moves only on a state change.
    pub fn set_endpoint(
        &mut self,
        key: EndpointKey,
        state: EndpointState,
        error: Option<EndpointError>,
        now: DateTime<Utc>,
    ) {
        match self.endpoints.get_mut(&key) {
            Some(status) => {
                if status.state != state {
                    status.state = state;
                    status.last_transition_time = now;
                }
                status.last_error = error;
            }
            None => {
                self.endpoints.insert(
                    key,
                    EndpointStatus {
                        state,
                        oper_state: OperState::Unknown,
                        last_error: error,
                        last_transition_time: now,
                    },
                );
            }
        }
    }

    /// Updates every endpoint on `router`.
    pub fn set_router_state(
        &mut self,
        router: &str,
        state: EndpointState,
        error: Option<EndpointError>,
        now: DateTime<Utc>,
    ) {
        for key in self.endpoints_on(router) {
            self.set_endpoint(key, state, error.clone(), now);
        }
    }

    /// Records the operational state of every known endpoint on `router`.
    pub fn set_router_oper(&mut self, router: &str, oper: OperState) {
        for key in self.endpoints_on(router) {
            if let Some(status) = self.endpoints.get_mut(&key) {
                status.oper_state = oper;
            }
        }
    }

    /// Drops status entries for endpoints no longer in the service spec.
    pub fn retain_spec_endpoints(&mut self) {
        let keys: BTreeSet<EndpointKey> = self.spec.endpoint_keys().into_iter().collect();
        self.endpoints.retain(|k, _| keys.contains(k));
    }

    /// True if every endpoint on `router` is applied.
    pub fn router_applied(&self, router: &str) -> bool {
        self.endpoints_on(router).iter().all(|k| {
            self.endpoints
                .get(k)
                .is_some_and(|s| s.state == EndpointState::Applied)
        })
    }

    /// Baseline for planning the next generation: the last applied config
    /// per device, or the previous intended config where nothing was applied.
    pub fn prior_configs(&self) -> BTreeMap<String, DeviceConfig> {
        let mut prior: BTreeMap<String, DeviceConfig> = self
            .intended
            .iter()
            .map(|(router, config)| (router.clone(), config.clone()))
            .collect();
        for (router, applied) in &self.applied {
            prior.insert(router.clone(), applied.config.clone());
        }
        prior
    }

    /// Devices applied at the current generation, with their config.
    pub fn current_applied(&self) -> BTreeMap<String, DeviceConfig> {
        self.applied
            .iter()
            .filter(|(router, applied)| {
                applied.generation == self.generation && self.intended.device(router).is_some()
            })
            .map(|(router, applied)| (router.clone(), applied.config.clone()))
            .collect()
    }

    /// True if every intended device holds the current generation and no
    /// removed device is left behind.
    pub fn is_converged(&self) -> bool {
        self.phase == Phase::Active
            && self.applied.keys().eq(self.intended.routers())
            && self.applied.values().all(|a| a.generation == self.generation)
    }

    /// Everything that may have been placed on any device, applied or
    /// intended.
    pub fn teardown_targets(&self) -> BTreeMap<String, DeviceConfig> {
        let mut targets: BTreeMap<String, DeviceConfig> = self
            .applied
            .iter()
            .map(|(router, applied)| (router.clone(), applied.config.clone()))
            .collect();
        for (router, config) in self.intended.iter() {
            let merged = match targets.get(router) {
                Some(applied) => applied.merged(config),
                None => config.clone(),
            };
            targets.insert(router.clone(), merged);
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::intended_config;
    use crate::error::ErrorKind;
    use crate::intended::ConfigValue;
    use crate::types::Endpoint;
    use chrono::Duration;
    use nslice_types::ServiceType;
    use pretty_assertions::assert_eq;

    fn spec() -> ServiceSpec {
        ServiceSpec::new("blue", ServiceType::Vpls, 7001)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 701).with_sdp(7001))
            .with_endpoint(Endpoint::new("SR2", "1/1/c2/1", 702).with_sdp(7002))
    }

    fn record() -> ReconciliationRecord {
        ReconciliationRecord::new(ResourceKey::new("default", "blue"), spec())
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = record();
        assert_eq!(record.phase, Phase::Pending);
        assert_eq!(record.generation, 0);
        assert!(record.endpoints.is_empty());
    }

    #[test]
    fn test_transition_time_moves_only_on_state_change() {
        let mut record = record();
        let key = spec().endpoints[0].key();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let t2 = t0 + Duration::seconds(10);

        record.set_endpoint(key.clone(), EndpointState::Failed, None, t0);
        record.set_endpoint(
            key.clone(),
            EndpointState::Failed,
            Some(EndpointError::new(ErrorKind::Connection, "refused")),
            t1,
        );
        assert_eq!(record.endpoints[&key].last_transition_time, t0);
        assert!(record.endpoints[&key].last_error.is_some());

        record.set_endpoint(key.clone(), EndpointState::Applied, None, t2);
        assert_eq!(record.endpoints[&key].last_transition_time, t2);
        assert_eq!(record.endpoints[&key].last_error, None);
    }

    #[test]
    fn test_oper_state_per_router() {
        let mut record = record();
        let now = Utc::now();
        record.set_router_oper("SR1", OperState::Up);
        assert!(record.endpoints.is_empty());

        record.set_router_state("SR1", EndpointState::Applied, None, now);
        record.set_router_state("SR2", EndpointState::Applied, None, now);
        record.set_router_oper("SR1", OperState::from_leaf(" UP"));
        record.set_router_oper("SR2", OperState::from_leaf("down"));
        let states: Vec<OperState> = record.endpoints.values().map(|s| s.oper_state).collect();
        assert_eq!(states, vec![OperState::Up, OperState::Down]);

        // a state change keeps the last reading
        record.set_router_state("SR1", EndpointState::Drifted, None, now);
        assert_eq!(record.endpoints[&spec().endpoints[0].key()].oper_state, OperState::Up);
    }

    #[test]
    fn test_router_applied() {
        let mut record = record();
        let now = Utc::now();
        assert!(!record.router_applied("SR1"));
        record.set_router_state("SR1", EndpointState::Applied, None, now);
        assert!(record.router_applied("SR1"));
        assert!(!record.router_applied("SR2"));
    }

    #[test]
    fn test_prior_prefers_applied() {
        let mut record = record();
        record.intended = intended_config(&spec()).unwrap();
        record.applied.insert(
            "SR2".to_string(),
            AppliedConfig {
                generation: 1,
                config: DeviceConfig::new(),
            },
        );
        let prior = record.prior_configs();
        assert_eq!(prior.len(), 2);
        assert!(prior["SR2"].is_empty());
        assert_eq!(prior["SR1"].len(), 8);
    }

    #[test]
    fn test_converged_requires_every_device_at_generation() {
        let mut record = record();
        record.generation = 2;
        record.phase = Phase::Active;
        record.intended = intended_config(&spec()).unwrap();
        for router in ["SR1", "SR2"] {
            record.applied.insert(
                router.to_string(),
                AppliedConfig {
                    generation: 2,
                    config: record.intended.device(router).unwrap().clone(),
                },
            );
        }
        assert!(record.is_converged());

        record.applied.get_mut("SR2").unwrap().generation = 1;
        assert!(!record.is_converged());
    }

    #[test]
    fn test_teardown_targets_union() {
        let mut record = record();
        record.intended = intended_config(&spec()).unwrap();
        let mut orphan = DeviceConfig::new();
        orphan.push(
            ConfigPath::new("/configure/service/vpls[service-name=blue]"),
            ConfigValue::Present,
        );
        record.applied.insert(
            "SR3".to_string(),
            AppliedConfig {
                generation: 1,
                config: orphan,
            },
        );
        let targets = record.teardown_targets();
        assert_eq!(
            targets.keys().cloned().collect::<Vec<_>>(),
            vec!["SR1", "SR2", "SR3"]
        );
    }
}
