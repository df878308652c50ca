//! Per-router session pool with exclusive leases.

use super::{
    Capabilities, CredentialResolver, DeviceGateway, DeviceHandle, DeviceRef, GatewayError,
    GetResult, SetAck,
};
use crate::intended::{ConfigEntry, ConfigPath};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

#[derive(Debug, Default)]
struct SessionSlot {
    handle: Option<DeviceHandle>,
    capabilities: Option<Capabilities>,
}

/// Cached device sessions, one async mutex per router.
///
/// A [`DeviceLease`] holds the router's mutex for as long as it lives, so at
/// most one operation sequence is in flight per device across all services.
pub struct DeviceSessions {
    gateway: Arc<dyn DeviceGateway>,
    credentials: Arc<dyn CredentialResolver>,
    inventory: HashMap<String, DeviceRef>,
    op_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<SessionSlot>>>>,
}

impl DeviceSessions {
    pub fn new(gateway: Arc<dyn DeviceGateway>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            gateway,
            credentials,
            inventory: HashMap::new(),
            op_timeout: Duration::from_secs(10),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registers device addresses; unknown routers use [`DeviceRef::named`].
    pub fn with_inventory(mut self, devices: impl IntoIterator<Item = DeviceRef>) -> Self {
        self.inventory
            .extend(devices.into_iter().map(|d| (d.name.clone(), d)));
        self
    }

    /// Sets the per-operation timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    fn device_ref(&self, router: &str) -> DeviceRef {
        self.inventory
            .get(router)
            .cloned()
            .unwrap_or_else(|| DeviceRef::named(router))
    }

    /// Waits for exclusive access to `router`.
    pub async fn lease(&self, router: &str) -> DeviceLease<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(router.to_string()).or_default())
        };
        let guard = slot.lock_owned().await;
        DeviceLease {
            sessions: self,
            router: router.to_string(),
            slot: guard,
        }
    }
}

/// Exclusive access to one router's session.
pub struct DeviceLease<'a> {
    sessions: &'a DeviceSessions,
    router: String,
    slot: OwnedMutexGuard<SessionSlot>,
}

impl DeviceLease<'_> {
    pub fn router(&self) -> &str {
        &self.router
    }

    async fn timed<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.sessions.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(&self.router, operation)),
        }
    }

    async fn handle(&mut self) -> Result<DeviceHandle, GatewayError> {
        if let Some(handle) = &self.slot.handle {
            return Ok(handle.clone());
        }

        let device = self.sessions.device_ref(&self.router);
        let credentials = self
            .sessions
            .credentials
            .resolve(&self.router)
            .await
            .map_err(|e| GatewayError::Credentials {
                router: self.router.clone(),
                message: e.to_string(),
            })?;

        debug!(device = %device, "connecting");
        let handle = self
            .timed("connect", self.sessions.gateway.connect(&device, &credentials))
            .await?;
        self.slot.handle = Some(handle.clone());
        Ok(handle)
    }

    fn observe<T>(&mut self, result: Result<T, GatewayError>) -> Result<T, GatewayError> {
        if let Err(e) = &result {
            if e.invalidates_session() && self.slot.handle.is_some() {
                warn!(router = %self.router, error = %e, "dropping device session");
                self.slot.handle = None;
                self.slot.capabilities = None;
            }
        }
        result
    }

    /// Reads the current value of each path.
    #[instrument(skip(self, paths), fields(router = %self.router, paths = paths.len()))]
    pub async fn get(&mut self, paths: &[ConfigPath]) -> Result<GetResult, GatewayError> {
        let handle = self.handle().await?;
        let result = self
            .timed("get", self.sessions.gateway.get(&handle, paths))
            .await;
        self.observe(result)
    }

    /// Sends one `Set` transaction.
    #[instrument(skip(self, updates, deletes), fields(router = %self.router, updates = updates.len(), deletes = deletes.len()))]
    pub async fn set(
        &mut self,
        updates: &[ConfigEntry],
        deletes: &[ConfigPath],
    ) -> Result<SetAck, GatewayError> {
        let handle = self.handle().await?;
        let result = self
            .timed("set", self.sessions.gateway.set(&handle, updates, deletes))
            .await;
        self.observe(result)
    }

    /// Device capabilities, cached for the life of the session.
    pub async fn capabilities(&mut self) -> Result<Capabilities, GatewayError> {
        if let Some(caps) = &self.slot.capabilities {
            return Ok(caps.clone());
        }
        let handle = self.handle().await?;
        let result = self
            .timed("capabilities", self.sessions.gateway.capabilities(&handle))
            .await;
        let caps = self.observe(result)?;
        self.slot.capabilities = Some(caps.clone());
        Ok(caps)
    }
}
