//! Declarative service resources.

use nslice_types::{AdminState, ParseError, SapId, SdpBindingKind, ServiceType};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_customer() -> u32 {
    1
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_generation() -> u64 {
    1
}

/// Desired state of one network service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub service_name: String,
    pub service_type: ServiceType,
    pub service_id: u32,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default = "default_customer")]
    pub customer: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// SAP ingress QoS policy name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
    /// SAP ingress committed rate in kbps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_guarantee: Option<u64>,
    /// SDP binding flavour for VPLS services.
    #[serde(default)]
    pub vpls_type: SdpBindingKind,
    /// VPRN router id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl ServiceSpec {
    /// Creates a spec with defaults and no endpoints.
    pub fn new(name: impl Into<String>, service_type: ServiceType, service_id: u32) -> Self {
        Self {
            service_name: name.into(),
            service_type,
            service_id,
            admin_state: AdminState::default(),
            customer: default_customer(),
            description: None,
            priority_class: None,
            bandwidth_guarantee: None,
            vpls_type: SdpBindingKind::default(),
            router_id: None,
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_admin_state(mut self, admin_state: AdminState) -> Self {
        self.admin_state = admin_state;
        self
    }

    pub fn with_qos(mut self, priority_class: impl Into<String>, bandwidth_kbps: u64) -> Self {
        self.priority_class = Some(priority_class.into());
        self.bandwidth_guarantee = Some(bandwidth_kbps);
        self
    }

    /// Description sent to the device, `Service <type> <id>` when unset.
    pub fn description_or_default(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("Service {} {}", self.service_type, self.service_id))
    }

    /// Endpoint keys in spec order.
    pub fn endpoint_keys(&self) -> Vec<EndpointKey> {
        self.endpoints.iter().map(Endpoint::key).collect()
    }
}

/// One attachment point of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub router_name: String,
    pub interface_name: String,
    #[serde(rename = "vlanID")]
    pub vlan_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_id: Option<u32>,
    /// VPRN interface address in `a.b.c.d/len` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl Endpoint {
    pub fn new(router: impl Into<String>, interface: impl Into<String>, vlan_id: u16) -> Self {
        Self {
            router_name: router.into(),
            interface_name: interface.into(),
            vlan_id,
            sdp_id: None,
            ip_address: None,
        }
    }

    pub fn with_sdp(mut self, sdp_id: u32) -> Self {
        self.sdp_id = Some(sdp_id);
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Validated SAP of this endpoint.
    pub fn sap(&self) -> Result<SapId, ParseError> {
        SapId::new(self.interface_name.as_str(), self.vlan_id)
    }

    /// SAP identifier on the device: `<interface>:<vlan>`.
    pub fn sap_id(&self) -> String {
        format!("{}:{}", self.interface_name, self.vlan_id)
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            router: self.router_name.clone(),
            interface: self.interface_name.clone(),
            vlan: self.vlan_id,
        }
    }
}

/// Identity of an endpoint in status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub router: String,
    pub interface: String,
    pub vlan: u16,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.router, self.interface, self.vlan)
    }
}

/// Identity of a declarative resource (`namespace/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource metadata carried by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_generation")]
    pub generation: u64,
}

/// A service resource as read from a manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub metadata: ManifestMetadata,
    pub spec: ServiceSpec,
}

impl ServiceManifest {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_from_manifest_json() {
        let json = r#"{
            "metadata": {"name": "blue"},
            "spec": {
                "serviceName": "blue",
                "serviceType": "VPLS",
                "serviceId": 7001,
                "endpoints": [
                    {"routerName": "SR1", "interfaceName": "1/1/c1/1", "vlanID": 701, "sdpId": 7001}
                ]
            }
        }"#;
        let manifest: ServiceManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.key().to_string(), "default/blue");
        assert_eq!(manifest.metadata.generation, 1);

        let spec = manifest.spec;
        assert_eq!(spec.admin_state, AdminState::Enable);
        assert_eq!(spec.customer, 1);
        assert_eq!(spec.vpls_type, SdpBindingKind::MeshSdp);
        assert_eq!(spec.endpoints[0].sdp_id, Some(7001));
        assert_eq!(spec.endpoints[0].sap_id(), "1/1/c1/1:701");
    }

    #[test]
    fn test_description_default() {
        let spec = ServiceSpec::new("green", ServiceType::Epipe, 42);
        assert_eq!(spec.description_or_default(), "Service ePipe 42");
    }

    #[test]
    fn test_endpoint_key_display() {
        let ep = Endpoint::new("SR2", "1/1/c2/1", 702).with_sdp(7002);
        assert_eq!(ep.key().to_string(), "SR2:1/1/c2/1:702");
    }
}
