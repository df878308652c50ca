//! Service spec fixtures
//!
//! Reusable specs for the common service shapes, keyed the way the test
//! fabric names its routers (SR1..SR4).

use nslice_mgrd::{ConfigPath, Endpoint, ResourceKey, ServiceSpec};
use nslice_types::ServiceType;

/// Namespace used by every fixture.
pub const NAMESPACE: &str = "default";

/// Resource key for a fixture name.
pub fn resource_key(name: &str) -> ResourceKey {
    ResourceKey::new(NAMESPACE, name)
}

/// Root container path of a service on any device.
pub fn service_root(service_type: ServiceType, name: &str) -> ConfigPath {
    ConfigPath::new(format!(
        "/configure/service/{}[service-name={}]",
        service_type.model_name(),
        name
    ))
}

/// VPLS fixtures
pub mod vpls_fixtures {
    use super::*;

    /// The two-router VPLS: SR1 1/1/c1/1 vlan 701 sdp 7001, SR2 1/1/c2/1
    /// vlan 702 sdp 7002, service id 7001.
    pub fn vpls_blue() -> ServiceSpec {
        ServiceSpec::new("blue", ServiceType::Vpls, 7001)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 701).with_sdp(7001))
            .with_endpoint(Endpoint::new("SR2", "1/1/c2/1", 702).with_sdp(7002))
    }

    /// `vpls_blue` with a third endpoint on SR3.
    pub fn vpls_blue_three_sites() -> ServiceSpec {
        vpls_blue().with_endpoint(Endpoint::new("SR3", "1/1/c3/1", 703).with_sdp(7003))
    }

    /// A second VPLS sharing SR1 and SR2 with `vpls_blue`, without collisions.
    pub fn vpls_green() -> ServiceSpec {
        ServiceSpec::new("green", ServiceType::Vpls, 7100)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/1", 710).with_sdp(7101))
            .with_endpoint(Endpoint::new("SR2", "1/1/c2/1", 720).with_sdp(7102))
    }

    /// Collides with `vpls_blue` on SR1's SDP id.
    pub fn vpls_sdp_collision() -> ServiceSpec {
        ServiceSpec::new("orange", ServiceType::Vpls, 7200)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/5", 750).with_sdp(7001))
            .with_endpoint(Endpoint::new("SR4", "1/1/c4/5", 750).with_sdp(7204))
    }
}

/// ePipe fixtures
pub mod epipe_fixtures {
    use super::*;

    /// Point-to-point between SR1 and SR4.
    pub fn epipe_red() -> ServiceSpec {
        ServiceSpec::new("red", ServiceType::Epipe, 8001)
            .with_endpoint(Endpoint::new("SR1", "1/1/c1/2", 801).with_sdp(8011))
            .with_endpoint(Endpoint::new("SR4", "1/1/c4/2", 801).with_sdp(8014))
    }

    /// An ePipe with `count` endpoints spread over SR1..SR4.
    pub fn epipe_with_endpoints(count: usize) -> ServiceSpec {
        (0..count).fold(ServiceSpec::new("bad-pw", ServiceType::Epipe, 8100), |spec, i| {
            spec.with_endpoint(
                Endpoint::new(format!("SR{}", i % 4 + 1), "1/1/c1/9", 900 + i as u16)
                    .with_sdp(8100 + i as u32),
            )
        })
    }
}

/// VPRN fixtures
pub mod vprn_fixtures {
    use super::*;

    /// Layer-3 service on SR2 and SR3 with addressed interfaces.
    pub fn vprn_gold() -> ServiceSpec {
        let mut spec = ServiceSpec::new("gold", ServiceType::Vprn, 9001)
            .with_qos("gold", 50_000)
            .with_endpoint(Endpoint::new("SR2", "1/1/c2/3", 901).with_ip("10.90.1.1/30"))
            .with_endpoint(Endpoint::new("SR3", "1/1/c3/3", 902).with_ip("10.90.2.1/30"));
        spec.router_id = Some("192.0.2.90".to_string());
        spec
    }
}
