//! Per-service-type configuration templates.
//!
//! Entries are emitted in creation order: the service container first, then
//! its leaves, then SAPs/interfaces, then SDP bindings.

use super::{parse_prefix, DeviceLayout, ServiceLayout};
use crate::intended::{ConfigPath, ConfigValue, DeviceConfig};
use crate::types::{Endpoint, ServiceSpec};
use nslice_types::{SdpBindingKind, ServiceType};

/// Root of all service configuration.
pub const SERVICE_ROOT: &str = "/configure/service";

/// Autonomous system used for route distinguishers and VRF targets.
pub const BGP_ASN: u32 = 64496;

pub(super) fn render(spec: &ServiceSpec, layout: &ServiceLayout<'_>, device: &DeviceLayout<'_>) -> DeviceConfig {
    let root = ConfigPath::new(SERVICE_ROOT).keyed(
        spec.service_type.model_name(),
        "service-name",
        spec.service_name.trim(),
    );

    let mut config = DeviceConfig::new();
    config.push(root.clone(), ConfigValue::Present);
    config.push(root.child("service-id"), ConfigValue::Number(u64::from(spec.service_id)));
    config.push(root.child("customer"), ConfigValue::Number(u64::from(spec.customer)));
    config.push(root.child("admin-state"), ConfigValue::text(spec.admin_state.as_str()));
    config.push(root.child("description"), ConfigValue::Text(spec.description_or_default()));

    match spec.service_type {
        ServiceType::Vpls => {
            for ep in &device.endpoints {
                push_sap(&mut config, &root, spec, ep);
            }
            push_sdp_bindings(&mut config, &root, spec, layout, device, spec.vpls_type);
        }
        ServiceType::Epipe => {
            for ep in &device.endpoints {
                push_sap(&mut config, &root, spec, ep);
            }
            push_sdp_bindings(&mut config, &root, spec, layout, device, SdpBindingKind::SpokeSdp);
        }
        ServiceType::Vprn => {
            if let Some(router_id) = &spec.router_id {
                config.push(root.child("router-id"), ConfigValue::text(router_id.trim()));
            }
            for ep in &device.endpoints {
                push_vprn_interface(&mut config, &root, spec, ep);
            }
            push_bgp_ipvpn(&mut config, &root, spec);
        }
    }

    config
}

fn push_sap(config: &mut DeviceConfig, parent: &ConfigPath, spec: &ServiceSpec, ep: &Endpoint) {
    let sap = parent.keyed("sap", "sap-id", ep.sap_id());
    config.push(sap.clone(), ConfigValue::Present);
    config.push(sap.child("admin-state"), ConfigValue::text("enable"));
    if let Some(policy) = &spec.priority_class {
        config.push(
            sap.child("ingress/qos/sap-ingress/policy-name"),
            ConfigValue::text(policy.trim()),
        );
    }
    if let Some(kbps) = spec.bandwidth_guarantee {
        config.push(
            sap.child("ingress/aggregate-policer/rate/cir"),
            ConfigValue::Number(kbps),
        );
    }
}

/// One binding per peer device, toward the SDP terminating on that peer.
fn push_sdp_bindings(
    config: &mut DeviceConfig,
    root: &ConfigPath,
    spec: &ServiceSpec,
    layout: &ServiceLayout<'_>,
    device: &DeviceLayout<'_>,
    kind: SdpBindingKind,
) {
    for peer in layout.peers(device.router) {
        let Some(peer_sdp) = peer.sdp_id else {
            continue;
        };
        let binding = root.keyed(
            kind.model_name(),
            "sdp-bind-id",
            format!("{}:{}", peer_sdp, spec.service_id),
        );
        config.push(binding.clone(), ConfigValue::Present);
        if kind == SdpBindingKind::SpokeSdp {
            config.push(binding.child("admin-state"), ConfigValue::text("enable"));
        }
    }
}

fn push_vprn_interface(config: &mut DeviceConfig, root: &ConfigPath, spec: &ServiceSpec, ep: &Endpoint) {
    // endpoints are checked before any template runs
    let Ok(sap) = ep.sap() else { return };
    let iface = root.keyed("interface", "interface-name", sap.interface_name());
    config.push(iface.clone(), ConfigValue::Present);
    config.push(iface.child("admin-state"), ConfigValue::text("enable"));
    if let Some((addr, len)) = ep.ip_address.as_deref().and_then(parse_prefix) {
        config.push(iface.child("ipv4/primary/address"), ConfigValue::Text(addr.to_string()));
        config.push(
            iface.child("ipv4/primary/prefix-length"),
            ConfigValue::Number(u64::from(len)),
        );
    }
    push_sap(config, &iface, spec, ep);
}

fn push_bgp_ipvpn(config: &mut DeviceConfig, root: &ConfigPath, spec: &ServiceSpec) {
    let mpls = root.child("bgp-ipvpn/mpls");
    config.push(mpls.clone(), ConfigValue::Present);
    config.push(mpls.child("admin-state"), ConfigValue::text("enable"));
    config.push(mpls.child("auto-bind-tunnel/resolution"), ConfigValue::text("any"));
    config.push(
        mpls.child("route-distinguisher"),
        ConfigValue::Text(format!("{}:{}", BGP_ASN, spec.service_id)),
    );
    config.push(
        mpls.child("vrf-target/community"),
        ConfigValue::Text(format!("target:{}:{}", BGP_ASN, spec.service_id)),
    );
}
