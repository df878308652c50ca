//! In-memory device fabric.
//!
//! Stands in for real routers when no transport is wired in, and lets tests
//! inject outages, rejected writes and out-of-band edits.
//!
//! A service's `oper-state` is derived from its config: `up` while its
//! `admin-state` is `enable`, `down` otherwise. Tests can pin it instead.

use super::{
    Capabilities, Credentials, DeviceGateway, DeviceHandle, DeviceRef, GatewayError, GetResult,
    SetAck,
};
use crate::drift::oper_state_path;
use crate::intended::{ConfigEntry, ConfigPath, ConfigValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Data model advertised by simulated devices.
pub const SIMULATED_MODEL: &str = "nokia-conf";

#[derive(Debug)]
struct SimDevice {
    reachable: bool,
    atomic_set: bool,
    session: Option<u64>,
    config: BTreeMap<ConfigPath, ConfigValue>,
    /// Pinned `/state` values.
    state: BTreeMap<ConfigPath, ConfigValue>,
    fail_sets: u32,
    fail_transient: bool,
    fail_after: Option<u32>,
    connects: u64,
    sets: u64,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            reachable: true,
            atomic_set: true,
            session: None,
            config: BTreeMap::new(),
            state: BTreeMap::new(),
            fail_sets: 0,
            fail_transient: false,
            fail_after: None,
            connects: 0,
            sets: 0,
        }
    }

    fn read(&self, path: &ConfigPath) -> Option<ConfigValue> {
        if let Some(value) = self.config.get(path).or_else(|| self.state.get(path)) {
            return Some(value.clone());
        }
        // the configured service whose oper-state lives at `path`
        let service = self.config.iter().find_map(|(p, v)| match v {
            ConfigValue::Number(id) if p.leaf_name() == "service-id" => u32::try_from(*id)
                .ok()
                .filter(|id| oper_state_path(*id) == *path)
                .and_then(|_| p.parent()),
            _ => None,
        })?;
        let enabled = self.config.get(&service.child("admin-state")) == Some(&ConfigValue::text("enable"));
        Some(ConfigValue::text(if enabled { "up" } else { "down" }))
    }

    fn remove_subtree(config: &mut BTreeMap<ConfigPath, ConfigValue>, path: &ConfigPath) {
        config.retain(|p, _| !p.is_within(path));
    }

    /// Keyed list entries above `path` must already exist.
    fn check_parents(
        config: &BTreeMap<ConfigPath, ConfigValue>,
        router: &str,
        path: &ConfigPath,
    ) -> Result<(), GatewayError> {
        for ancestor in path.ancestors() {
            if ancestor.is_list_entry() && !config.contains_key(&ancestor) {
                return Err(GatewayError::rejected(
                    router,
                    "set",
                    format!("parent {} of {} does not exist", ancestor, path),
                ));
            }
        }
        Ok(())
    }
}

/// Simulated gateway holding every device's configuration in memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    devices: Mutex<HashMap<String, SimDevice>>,
    next_session: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fabric with the given reachable, atomic devices.
    pub fn with_routers<I, S>(routers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateway = Self::new();
        for router in routers {
            gateway.add_device(router);
        }
        gateway
    }

    pub fn add_device(&self, router: impl Into<String>) {
        self.devices.lock().insert(router.into(), SimDevice::new());
    }

    fn with_device<T>(&self, router: &str, f: impl FnOnce(&mut SimDevice) -> T) -> Option<T> {
        self.devices.lock().get_mut(router).map(f)
    }

    /// Makes a device reachable or not. Going down drops its session.
    pub fn set_reachable(&self, router: &str, reachable: bool) {
        self.with_device(router, |d| {
            d.reachable = reachable;
            if !reachable {
                d.session = None;
            }
        });
    }

    /// Whether a device applies multi-path `Set`s atomically.
    pub fn set_atomic(&self, router: &str, atomic: bool) {
        self.with_device(router, |d| d.atomic_set = atomic);
    }

    /// The next `count` sets fail; transient failures are retryable.
    pub fn fail_next_sets(&self, router: &str, count: u32, transient: bool) {
        self.with_device(router, |d| {
            d.fail_sets = count;
            d.fail_transient = transient;
        });
    }

    /// After `ok` more successful sets, one set is rejected.
    pub fn fail_set_after(&self, router: &str, ok: u32) {
        self.with_device(router, |d| d.fail_after = Some(ok));
    }

    /// Out-of-band write of one value.
    pub fn set_raw(&self, router: &str, path: ConfigPath, value: ConfigValue) {
        self.with_device(router, |d| {
            d.config.insert(path, value);
        });
    }

    /// Pins the reported `oper-state` of a service.
    pub fn set_oper_state(&self, router: &str, service_id: u32, state: &str) {
        self.with_device(router, |d| {
            d.state.insert(oper_state_path(service_id), ConfigValue::text(state));
        });
    }

    /// Out-of-band removal of a path and everything below it.
    pub fn remove_path(&self, router: &str, path: &ConfigPath) {
        self.with_device(router, |d| SimDevice::remove_subtree(&mut d.config, path));
    }

    /// Snapshot of a device's configuration.
    pub fn config_of(&self, router: &str) -> BTreeMap<ConfigPath, ConfigValue> {
        self.with_device(router, |d| d.config.clone())
            .unwrap_or_default()
    }

    pub fn value_at(&self, router: &str, path: &ConfigPath) -> Option<ConfigValue> {
        self.with_device(router, |d| d.config.get(path).cloned())
            .flatten()
    }

    pub fn connect_count(&self, router: &str) -> u64 {
        self.with_device(router, |d| d.connects).unwrap_or(0)
    }

    pub fn set_count(&self, router: &str) -> u64 {
        self.with_device(router, |d| d.sets).unwrap_or(0)
    }

    fn session_check<'a>(
        devices: &'a mut HashMap<String, SimDevice>,
        handle: &DeviceHandle,
    ) -> Result<&'a mut SimDevice, GatewayError> {
        let device = devices
            .get_mut(&handle.router)
            .ok_or_else(|| GatewayError::UnknownDevice {
                router: handle.router.clone(),
            })?;
        if !device.reachable || device.session != Some(handle.session_id) {
            return Err(GatewayError::transport(&handle.router, "session closed by peer"));
        }
        Ok(device)
    }
}

#[async_trait]
impl DeviceGateway for MemoryGateway {
    async fn connect(
        &self,
        device: &DeviceRef,
        _credentials: &Credentials,
    ) -> Result<DeviceHandle, GatewayError> {
        let mut devices = self.devices.lock();
        let sim = devices
            .get_mut(&device.name)
            .ok_or_else(|| GatewayError::UnknownDevice {
                router: device.name.clone(),
            })?;
        if !sim.reachable {
            return Err(GatewayError::connection(&device.name, "connection refused"));
        }
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        sim.session = Some(session_id);
        sim.connects += 1;
        Ok(DeviceHandle {
            router: device.name.clone(),
            session_id,
        })
    }

    async fn get(&self, handle: &DeviceHandle, paths: &[ConfigPath]) -> Result<GetResult, GatewayError> {
        let mut devices = self.devices.lock();
        let device = Self::session_check(&mut devices, handle)?;
        Ok(paths
            .iter()
            .map(|p| (p.clone(), device.read(p)))
            .collect())
    }

    async fn set(
        &self,
        handle: &DeviceHandle,
        updates: &[ConfigEntry],
        deletes: &[ConfigPath],
    ) -> Result<SetAck, GatewayError> {
        let mut devices = self.devices.lock();
        let device = Self::session_check(&mut devices, handle)?;
        let router = handle.router.as_str();

        if device.fail_sets > 0 {
            device.fail_sets -= 1;
            return Err(if device.fail_transient {
                GatewayError::transport(router, "stream reset")
            } else {
                GatewayError::rejected(router, "set", "commit failed")
            });
        }
        if let Some(remaining) = device.fail_after {
            if remaining == 0 {
                device.fail_after = None;
                return Err(GatewayError::rejected(router, "set", "commit failed"));
            }
            device.fail_after = Some(remaining - 1);
        }

        // Work on a copy so a rejected transaction leaves no trace.
        let mut staged = device.config.clone();
        for path in deletes {
            SimDevice::remove_subtree(&mut staged, path);
        }
        for entry in updates {
            SimDevice::check_parents(&staged, router, &entry.path)?;
            staged.insert(entry.path.clone(), entry.value.clone());
        }
        device.config = staged;
        device.sets += 1;

        Ok(SetAck {
            updated: updates.len(),
            deleted: deletes.len(),
        })
    }

    async fn capabilities(&self, handle: &DeviceHandle) -> Result<Capabilities, GatewayError> {
        let mut devices = self.devices.lock();
        let device = Self::session_check(&mut devices, handle)?;
        Ok(Capabilities {
            models: vec![SIMULATED_MODEL.to_string()],
            atomic_set: device.atomic_set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn creds() -> Credentials {
        Credentials::new("admin", "admin")
    }

    fn root() -> ConfigPath {
        ConfigPath::new("/configure/service").keyed("vpls", "service-name", "blue")
    }

    #[tokio::test]
    async fn test_connect_unknown_and_unreachable() {
        let gateway = MemoryGateway::with_routers(["SR1"]);
        let err = gateway.connect(&DeviceRef::named("SR9"), &creds()).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownDevice { .. }));

        gateway.set_reachable("SR1", false);
        let err = gateway.connect(&DeviceRef::named("SR1"), &creds()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_set_rejects_child_before_parent() {
        let gateway = MemoryGateway::with_routers(["SR1"]);
        let handle = gateway.connect(&DeviceRef::named("SR1"), &creds()).await.unwrap();
        let sap = root().keyed("sap", "sap-id", "1/1/c1/1:701");

        let err = gateway
            .set(&handle, &[ConfigEntry::new(sap.clone(), ConfigValue::Present)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
        assert!(gateway.config_of("SR1").is_empty());

        gateway
            .set(
                &handle,
                &[
                    ConfigEntry::new(root(), ConfigValue::Present),
                    ConfigEntry::new(sap.clone(), ConfigValue::Present),
                ],
                &[],
            )
            .await
            .unwrap();
        assert_eq!(gateway.config_of("SR1").len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_only() {
        let gateway = MemoryGateway::with_routers(["SR1"]);
        let unrelated = ConfigPath::new("/configure/system/name");
        gateway.set_raw("SR1", root(), ConfigValue::Present);
        gateway.set_raw("SR1", root().child("admin-state"), ConfigValue::text("enable"));
        gateway.set_raw("SR1", unrelated.clone(), ConfigValue::text("sr1"));

        let handle = gateway.connect(&DeviceRef::named("SR1"), &creds()).await.unwrap();
        gateway.set(&handle, &[], &[root()]).await.unwrap();
        // deleting a missing path is not an error
        gateway.set(&handle, &[], &[root()]).await.unwrap();

        let config = gateway.config_of("SR1");
        assert_eq!(config.len(), 1);
        assert!(config.contains_key(&unrelated));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let gateway = MemoryGateway::with_routers(["SR1"]);
        let handle = gateway.connect(&DeviceRef::named("SR1"), &creds()).await.unwrap();
        let entry = [ConfigEntry::new(root(), ConfigValue::Present)];

        gateway.fail_next_sets("SR1", 1, true);
        assert!(gateway.set(&handle, &entry, &[]).await.unwrap_err().is_retryable());
        gateway.set(&handle, &entry, &[]).await.unwrap();

        gateway.fail_set_after("SR1", 1);
        gateway.set(&handle, &entry, &[]).await.unwrap();
        assert!(!gateway.set(&handle, &entry, &[]).await.unwrap_err().is_retryable());
        assert_eq!(gateway.set_count("SR1"), 2);
    }

    #[tokio::test]
    async fn test_oper_state_follows_admin_state() {
        let gateway = MemoryGateway::with_routers(["SR1"]);
        let oper = oper_state_path(7001);
        gateway.set_raw("SR1", root(), ConfigValue::Present);
        gateway.set_raw("SR1", root().child("service-id"), ConfigValue::Number(7001));
        gateway.set_raw("SR1", root().child("admin-state"), ConfigValue::text("enable"));

        let handle = gateway.connect(&DeviceRef::named("SR1"), &creds()).await.unwrap();
        let read = |result: GetResult| result.into_iter().next().and_then(|(_, v)| v);
        let up = gateway.get(&handle, std::slice::from_ref(&oper)).await.unwrap();
        assert_eq!(read(up), Some(ConfigValue::text("up")));

        gateway.set_raw("SR1", root().child("admin-state"), ConfigValue::text("disable"));
        let down = gateway.get(&handle, std::slice::from_ref(&oper)).await.unwrap();
        assert_eq!(read(down), Some(ConfigValue::text("down")));

        gateway.set_oper_state("SR1", 7001, "up");
        let pinned = gateway.get(&handle, std::slice::from_ref(&oper)).await.unwrap();
        assert_eq!(read(pinned), Some(ConfigValue::text("up")));
        // state never shows up as config
        assert_eq!(gateway.config_of("SR1").len(), 3);

        let missing = gateway.get(&handle, &[oper_state_path(9)]).await.unwrap();
        assert_eq!(read(missing), None);
    }

    #[tokio::test]
    async fn test_stale_session_rejected() {
        let gateway = MemoryGateway::with_routers(["SR1"]);
        let handle = gateway.connect(&DeviceRef::named("SR1"), &creds()).await.unwrap();
        gateway.set_reachable("SR1", false);
        gateway.set_reachable("SR1", true);
        let err = gateway.get(&handle, &[root()]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }
}
