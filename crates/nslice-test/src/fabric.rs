//! Simulated router fabric wired to a live `SliceMgr`.

use nslice_mgrd::{
    Credentials, DeviceGateway, DeviceSessions, DriftDetector, EventSender, MemoryGateway,
    MemoryStatusSink, Orchestrator, Phase, Reconciler, ReconciliationRecord, ResourceKey,
    ServiceSpec, SliceMgr, StaticCredentials, StatusDocument, StatusSink,
};
use nslice_orch_common::{Orch, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Routers present in every fabric.
pub const ROUTERS: [&str; 4] = ["SR1", "SR2", "SR3", "SR4"];

/// Four simulated routers, a memory status sink and the orch under test.
///
/// Tests drive it step by step: submit events, then `settle` to run every
/// resulting cycle to completion.
pub struct TestFabric {
    pub gateway: Arc<MemoryGateway>,
    pub sink: Arc<MemoryStatusSink>,
    pub mgr: SliceMgr,
    sender: EventSender,
    specs: HashMap<ResourceKey, (ServiceSpec, u64)>,
}

impl TestFabric {
    pub fn new() -> Self {
        let gateway = Arc::new(MemoryGateway::with_routers(ROUTERS));
        let sessions = Arc::new(DeviceSessions::new(
            Arc::clone(&gateway) as Arc<dyn DeviceGateway>,
            Arc::new(StaticCredentials::new().with_fallback(Credentials::new("admin", "admin"))),
        ));
        let retry = RetryPolicy::default()
            .with_max_attempts(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(20));
        let orchestrator = Orchestrator::new(Arc::clone(&sessions)).with_retry(retry);
        let sink = Arc::new(MemoryStatusSink::new());
        let reconciler = Reconciler::new(
            orchestrator,
            DriftDetector::new(sessions),
            Arc::clone(&sink) as Arc<dyn StatusSink>,
        );
        let (mgr, sender) = SliceMgr::new(reconciler);
        Self {
            gateway,
            sink,
            mgr,
            sender,
            specs: HashMap::new(),
        }
    }

    /// Submits a create at generation 1.
    pub fn create(&mut self, key: &ResourceKey, spec: ServiceSpec) {
        self.specs.insert(key.clone(), (spec.clone(), 1));
        self.sender
            .on_create(key.clone(), spec, 1)
            .expect("event queue open");
    }

    /// Submits an update at the next generation.
    pub fn update(&mut self, key: &ResourceKey, spec: ServiceSpec) {
        let (old, generation) = self
            .specs
            .get(key)
            .cloned()
            .expect("update of a resource never created");
        let next = generation + 1;
        self.specs.insert(key.clone(), (spec.clone(), next));
        self.sender
            .on_update(key.clone(), &old, spec, next)
            .expect("event queue open");
    }

    pub fn delete(&mut self, key: &ResourceKey) {
        let (spec, generation) = self
            .specs
            .remove(key)
            .expect("delete of a resource never created");
        self.sender
            .on_delete(key.clone(), spec, generation)
            .expect("event queue open");
    }

    /// Runs until no cycle is queued or running.
    pub async fn settle(&mut self) {
        self.mgr.run_until_idle().await;
    }

    /// One drift timer tick, plus any heal it schedules.
    pub async fn drift_cycle(&mut self) {
        self.mgr.on_timer();
        self.settle().await;
    }

    /// One resync timer tick.
    pub async fn resync_cycle(&mut self) {
        self.mgr.on_resync();
        self.settle().await;
    }

    pub fn phase(&self, key: &ResourceKey) -> Option<Phase> {
        self.mgr.phase(key)
    }

    pub fn record(&self, key: &ResourceKey) -> Option<&ReconciliationRecord> {
        self.mgr.record(key)
    }

    pub fn status(&self, key: &ResourceKey) -> Option<StatusDocument> {
        self.sink.get(key)
    }
}

impl Default for TestFabric {
    fn default() -> Self {
        Self::new()
    }
}
