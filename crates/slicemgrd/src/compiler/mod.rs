//! Service model compiler.
//!
//! Pure functions that turn a [`ServiceSpec`] into an [`IntendedConfig`]
//! and diff two generations into per-device [`DeviceOps`]. Nothing here
//! touches a device or a reconciliation record.

mod templates;

use crate::intended::{ConfigPath, DeviceConfig, DeviceOps, IntendedConfig};
use crate::types::{Endpoint, ServiceSpec};
use nslice_types::ServiceType;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors returned by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The spec violates a structural rule.
    #[error("invalid spec: {reason}")]
    InvalidSpec {
        /// Human readable reason.
        reason: String,
    },
}

impl CompileError {
    /// Creates an invalid spec error.
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Returns the reason text.
    pub fn reason(&self) -> &str {
        match self {
            CompileError::InvalidSpec { reason } => reason,
        }
    }
}

/// Output of [`compile`]: the new intended config and the ops to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledService {
    pub intended: IntendedConfig,
    pub ops: Vec<DeviceOps>,
}

/// One device taking part in a service, with its endpoints in spec order.
#[derive(Debug)]
pub(crate) struct DeviceLayout<'a> {
    pub router: &'a str,
    pub endpoints: Vec<&'a Endpoint>,
    /// SDP terminating on this device, when the service needs one.
    pub sdp_id: Option<u32>,
}

/// Validated view of a spec, devices sorted by router name.
#[derive(Debug)]
pub(crate) struct ServiceLayout<'a> {
    pub devices: Vec<DeviceLayout<'a>>,
}

impl<'a> ServiceLayout<'a> {
    /// Devices other than `router`, with their SDP ids.
    pub fn peers<'s>(&'s self, router: &'s str) -> impl Iterator<Item = &'s DeviceLayout<'a>> + 's {
        self.devices.iter().filter(move |d| d.router != router)
    }
}

/// Resource claimed exclusively by one service on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Claim {
    ServiceName(String),
    ServiceId(u32),
    Sap(String),
    Sdp(u32),
}

impl std::fmt::Display for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::ServiceName(n) => write!(f, "service-name {}", n),
            Claim::ServiceId(id) => write!(f, "service-id {}", id),
            Claim::Sap(sap) => write!(f, "SAP {}", sap),
            Claim::Sdp(sdp) => write!(f, "SDP {}", sdp),
        }
    }
}

/// A claim scoped to a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceClaim {
    pub router: String,
    pub claim: Claim,
}

fn check_endpoint(index: usize, ep: &Endpoint) -> Result<(), CompileError> {
    if ep.router_name.trim().is_empty() {
        return Err(CompileError::invalid_spec(format!(
            "endpoint {} has an empty routerName",
            index
        )));
    }
    if ep.interface_name.trim().is_empty() {
        return Err(CompileError::invalid_spec(format!(
            "endpoint {} has an empty interfaceName",
            index
        )));
    }
    ep.sap().map_err(|e| {
        CompileError::invalid_spec(format!("endpoint {} on {}: {}", index, ep.router_name, e))
    })?;
    if ep.sdp_id == Some(0) {
        return Err(CompileError::invalid_spec(format!(
            "endpoint {} on {}: sdpId must be >= 1",
            index, ep.router_name
        )));
    }
    if let Some(ip) = &ep.ip_address {
        parse_prefix(ip).ok_or_else(|| {
            CompileError::invalid_spec(format!(
                "endpoint {} on {}: ipAddress '{}' is not a.b.c.d/len",
                index, ep.router_name, ip
            ))
        })?;
    }
    Ok(())
}

/// Parses `a.b.c.d/len` into address and prefix length.
pub(crate) fn parse_prefix(s: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, len) = s.trim().split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let len: u8 = len.parse().ok()?;
    (len <= 32).then_some((addr, len))
}

/// Checks structural invariants and groups endpoints per device.
pub(crate) fn validate(spec: &ServiceSpec) -> Result<ServiceLayout<'_>, CompileError> {
    let name = spec.service_name.trim();
    if name.is_empty() {
        return Err(CompileError::invalid_spec("serviceName must not be empty"));
    }
    if name.contains(|c: char| matches!(c, '[' | ']' | '=')) {
        return Err(CompileError::invalid_spec(format!(
            "serviceName '{}' contains '[', ']' or '='",
            name
        )));
    }
    if spec.service_id == 0 {
        return Err(CompileError::invalid_spec("serviceId must be >= 1"));
    }

    let count = spec.endpoints.len();
    match spec.service_type {
        ServiceType::Epipe if count != 2 => {
            return Err(CompileError::invalid_spec(format!(
                "ePipe requires exactly 2 endpoints, found {}",
                count
            )));
        }
        ServiceType::Vpls | ServiceType::Vprn if count == 0 => {
            return Err(CompileError::invalid_spec(format!(
                "{} requires at least 1 endpoint",
                spec.service_type
            )));
        }
        _ => {}
    }

    if let Some(router_id) = &spec.router_id {
        router_id.parse::<Ipv4Addr>().map_err(|_| {
            CompileError::invalid_spec(format!("routerId '{}' is not an IPv4 address", router_id))
        })?;
    }
    if spec.priority_class.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(CompileError::invalid_spec("priorityClass must not be empty"));
    }

    let mut saps = BTreeSet::new();
    let mut by_router: BTreeMap<&str, Vec<&Endpoint>> = BTreeMap::new();
    for (index, ep) in spec.endpoints.iter().enumerate() {
        check_endpoint(index, ep)?;
        if !saps.insert((ep.router_name.as_str(), ep.sap_id())) {
            return Err(CompileError::invalid_spec(format!(
                "duplicate SAP {} on {}",
                ep.sap_id(),
                ep.router_name
            )));
        }
        by_router.entry(ep.router_name.as_str()).or_default().push(ep);
    }

    let needs_sdp = spec.service_type.uses_sdp() && by_router.len() > 1;
    let mut devices = Vec::with_capacity(by_router.len());
    let mut sdp_owner: BTreeMap<u32, &str> = BTreeMap::new();
    for (router, endpoints) in by_router {
        let mut sdp_id = None;
        if needs_sdp {
            let ids: BTreeSet<Option<u32>> = endpoints.iter().map(|e| e.sdp_id).collect();
            if ids.len() > 1 {
                return Err(CompileError::invalid_spec(format!(
                    "endpoints on {} disagree on sdpId",
                    router
                )));
            }
            let id = ids.into_iter().flatten().next().ok_or_else(|| {
                CompileError::invalid_spec(format!(
                    "sdpId is required on {} for a multi-device {}",
                    router, spec.service_type
                ))
            })?;
            if let Some(other) = sdp_owner.insert(id, router) {
                return Err(CompileError::invalid_spec(format!(
                    "sdpId {} used by both {} and {}",
                    id, other, router
                )));
            }
            sdp_id = Some(id);
        }
        devices.push(DeviceLayout {
            router,
            endpoints,
            sdp_id,
        });
    }

    Ok(ServiceLayout { devices })
}

/// Compiles a spec into its intended configuration.
///
/// Deterministic: the same spec always yields an identical value.
pub fn intended_config(spec: &ServiceSpec) -> Result<IntendedConfig, CompileError> {
    let layout = validate(spec)?;
    let mut intended = IntendedConfig::new();
    for device in &layout.devices {
        *intended.device_mut(device.router) = templates::render(spec, &layout, device);
    }
    Ok(intended)
}

/// Device-scoped resources the service claims.
pub fn claims(spec: &ServiceSpec) -> Result<Vec<DeviceClaim>, CompileError> {
    let layout = validate(spec)?;
    let mut out = Vec::new();
    for device in &layout.devices {
        let mut push = |claim| {
            out.push(DeviceClaim {
                router: device.router.to_string(),
                claim,
            })
        };
        push(Claim::ServiceName(spec.service_name.trim().to_string()));
        push(Claim::ServiceId(spec.service_id));
        for ep in &device.endpoints {
            push(Claim::Sap(ep.sap_id()));
        }
        if let Some(sdp) = device.sdp_id {
            push(Claim::Sdp(sdp));
        }
    }
    Ok(out)
}

/// Removed paths of `prior` not kept by `next`, collapsed to their
/// top-most path and ordered children first.
fn removed_roots(prior: &DeviceConfig, next: Option<&DeviceConfig>) -> Vec<ConfigPath> {
    let removed: Vec<&ConfigPath> = prior
        .entries()
        .iter()
        .map(|e| &e.path)
        .filter(|p| next.map_or(true, |n| !n.contains(p)))
        .collect();

    let mut roots: Vec<ConfigPath> = removed
        .iter()
        .filter(|p| !removed.iter().any(|q| p.is_descendant_of(q)))
        .map(|p| (*p).clone())
        .collect();
    roots.reverse();
    roots
}

/// Diffs prior per-device configs against the next intended config.
///
/// Every device of `next` gets its full update list; devices only present
/// in `prior` get delete-only ops.
pub fn plan(prior: &BTreeMap<String, DeviceConfig>, next: &IntendedConfig) -> Vec<DeviceOps> {
    let routers: BTreeSet<&String> = prior.keys().chain(next.routers()).collect();
    let mut ops = Vec::with_capacity(routers.len());
    for router in routers {
        let next_config = next.device(router);
        let mut device_ops = DeviceOps::new(router.as_str());
        if let Some(config) = next_config {
            device_ops.updates = config.entries().to_vec();
        }
        if let Some(prior_config) = prior.get(router) {
            device_ops.deletes = removed_roots(prior_config, next_config);
        }
        if !device_ops.is_empty() {
            ops.push(device_ops);
        }
    }
    ops
}

/// Compiles `spec` and plans the transition from `prior`.
pub fn compile(
    spec: &ServiceSpec,
    prior: &BTreeMap<String, DeviceConfig>,
) -> Result<CompiledService, CompileError> {
    let intended = intended_config(spec)?;
    let ops = plan(prior, &intended);
    Ok(CompiledService { intended, ops })
}

/// Delete-only ops removing everything `configs` placed on each device.
pub fn teardown_plan(configs: &BTreeMap<String, DeviceConfig>) -> Vec<DeviceOps> {
    configs
        .iter()
        .filter(|(_, config)| !config.is_empty())
        .map(|(router, config)| DeviceOps {
            router: router.clone(),
            updates: Vec::new(),
            deletes: removed_roots(config, None),
        })
        .collect()
}

/// Re-applies exactly `drifted` from the last applied config, in creation order.
pub fn heal_plan(router: &str, last_applied: &DeviceConfig, drifted: &[ConfigPath]) -> DeviceOps {
    DeviceOps {
        router: router.to_string(),
        updates: last_applied.select(drifted),
        deletes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intended::ConfigValue;
    use pretty_assertions::assert_eq;

    fn vpls() -> ServiceSpec {
        ServiceSpec::new("blue", ServiceType::Vpls, 7001)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 701).with_sdp(7001))
            .with_endpoint(Endpoint::new("SR2", "1/1/c2/1", 702).with_sdp(7002))
    }

    fn reason(spec: &ServiceSpec) -> String {
        intended_config(spec).unwrap_err().reason().to_string()
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = intended_config(&vpls()).unwrap();
        let b = intended_config(&vpls()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_peers_exclude_own_router() {
        let spec = vpls().with_endpoint(Endpoint::new("SR3", "1/1/c3/1", 703).with_sdp(7003));
        let layout = validate(&spec).unwrap();
        let peers: Vec<(&str, Option<u32>)> = layout.peers("SR2").map(|d| (d.router, d.sdp_id)).collect();
        assert_eq!(peers, vec![("SR1", Some(7001)), ("SR3", Some(7003))]);
    }

    #[test]
    fn test_epipe_requires_two_endpoints() {
        for n in [0usize, 1, 3] {
            let mut spec = ServiceSpec::new("pw", ServiceType::Epipe, 10);
            for i in 0..n {
                spec = spec.with_endpoint(
                    Endpoint::new(format!("SR{}", i + 1), "1/1/c1/1", 100).with_sdp(100 + i as u32),
                );
            }
            assert!(matches!(
                intended_config(&spec),
                Err(CompileError::InvalidSpec { .. })
            ));
        }
    }

    #[test]
    fn test_structural_validation() {
        let empty = ServiceSpec::new("blue", ServiceType::Vprn, 1);
        assert_eq!(reason(&empty), "VPRN requires at least 1 endpoint");

        let bad_vlan =
            ServiceSpec::new("blue", ServiceType::Vpls, 1).with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 4095));
        assert!(reason(&bad_vlan).contains("invalid VLAN ID: 4095"));

        let dup = ServiceSpec::new("blue", ServiceType::Vpls, 1)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 10))
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 10));
        assert_eq!(reason(&dup), "duplicate SAP 1/1/c1/1:10 on SR1");

        let no_sdp = ServiceSpec::new("blue", ServiceType::Vpls, 1)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 10).with_sdp(5))
            .with_endpoint(Endpoint::new("SR2", "1/1/c1/1", 10));
        assert_eq!(reason(&no_sdp), "sdpId is required on SR2 for a multi-device VPLS");

        let same_sdp = ServiceSpec::new("blue", ServiceType::Vpls, 1)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 10).with_sdp(5))
            .with_endpoint(Endpoint::new("SR2", "1/1/c1/1", 10).with_sdp(5));
        assert_eq!(reason(&same_sdp), "sdpId 5 used by both SR1 and SR2");

        let zero_id = ServiceSpec::new("blue", ServiceType::Vpls, 0)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 10));
        assert_eq!(reason(&zero_id), "serviceId must be >= 1");
    }

    #[test]
    fn test_single_device_needs_no_sdp() {
        let spec = ServiceSpec::new("local", ServiceType::Epipe, 9)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 10))
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/2", 10));
        let intended = intended_config(&spec).unwrap();
        assert_eq!(intended.len(), 1);
        let config = intended.device("SR1").unwrap();
        assert!(!config
            .entries()
            .iter()
            .any(|e| e.path.as_str().contains("spoke-sdp")));
    }

    #[test]
    fn test_plan_deletes_removed_sap_only() {
        let prior_spec = vpls().with_endpoint(Endpoint::new("SR1", "1/1/c1/3", 703).with_sdp(7001));
        let prior = intended_config(&prior_spec).unwrap();
        let prior_map: BTreeMap<String, DeviceConfig> =
            prior.iter().map(|(r, c)| (r.clone(), c.clone())).collect();

        let next = intended_config(&vpls()).unwrap();
        let ops = plan(&prior_map, &next);
        assert_eq!(ops.len(), 2);

        let sr1 = &ops[0];
        assert_eq!(sr1.router, "SR1");
        assert_eq!(
            sr1.deletes,
            vec![ConfigPath::new(
                "/configure/service/vpls[service-name=blue]/sap[sap-id=1/1/c1/3:703]"
            )]
        );
        assert!(ops[1].deletes.is_empty());
    }

    #[test]
    fn test_plan_dropped_device_is_delete_only() {
        let prior = intended_config(&vpls()).unwrap();
        let prior_map: BTreeMap<String, DeviceConfig> =
            prior.iter().map(|(r, c)| (r.clone(), c.clone())).collect();

        let next_spec = ServiceSpec::new("blue", ServiceType::Vpls, 7001)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 701).with_sdp(7001));
        let next = intended_config(&next_spec).unwrap();
        let ops = plan(&prior_map, &next);

        let sr2 = ops.iter().find(|o| o.router == "SR2").unwrap();
        assert!(sr2.is_delete_only());
        assert_eq!(
            sr2.deletes,
            vec![ConfigPath::new("/configure/service/vpls[service-name=blue]")]
        );

        let sr1 = ops.iter().find(|o| o.router == "SR1").unwrap();
        assert_eq!(
            sr1.deletes,
            vec![ConfigPath::new(
                "/configure/service/vpls[service-name=blue]/mesh-sdp[sdp-bind-id=7002:7001]"
            )]
        );
    }

    #[test]
    fn test_compile_against_empty_prior() {
        let compiled = compile(&vpls(), &BTreeMap::new()).unwrap();
        assert_eq!(compiled.ops.len(), 2);
        assert!(compiled.ops.iter().all(|o| o.deletes.is_empty()));
        assert_eq!(
            compiled.ops[0].updates,
            compiled.intended.device("SR1").unwrap().entries().to_vec()
        );
    }

    #[test]
    fn test_teardown_removes_service_root() {
        let intended = intended_config(&vpls()).unwrap();
        let configs: BTreeMap<String, DeviceConfig> =
            intended.iter().map(|(r, c)| (r.clone(), c.clone())).collect();
        let ops = teardown_plan(&configs);
        assert_eq!(ops.len(), 2);
        for op in ops {
            assert_eq!(
                op.deletes,
                vec![ConfigPath::new("/configure/service/vpls[service-name=blue]")]
            );
        }
    }

    #[test]
    fn test_heal_plan_selects_drifted_paths() {
        let intended = intended_config(&vpls()).unwrap();
        let config = intended.device("SR1").unwrap();
        let sap = ConfigPath::new("/configure/service/vpls[service-name=blue]/sap[sap-id=1/1/c1/1:701]");
        let ops = heal_plan("SR1", config, &[sap.child("admin-state"), sap.clone()]);
        assert_eq!(ops.updates.len(), 2);
        assert_eq!(ops.updates[0].path, sap);
        assert_eq!(ops.updates[1].value, ConfigValue::text("enable"));
    }

    #[test]
    fn test_claims() {
        let claims = claims(&vpls()).unwrap();
        assert!(claims.contains(&DeviceClaim {
            router: "SR1".to_string(),
            claim: Claim::Sdp(7001),
        }));
        assert!(claims.contains(&DeviceClaim {
            router: "SR2".to_string(),
            claim: Claim::Sap("1/1/c2/1:702".to_string()),
        }));
        assert_eq!(claims.len(), 8);
    }
}
