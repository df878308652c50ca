//! SliceMgr - schedules reconciliation cycles.
//!
//! Lifecycle events are coalesced per resource in a [`Consumer`]. At most one
//! cycle runs per resource at a time; cycles of different resources run
//! concurrently on a [`JoinSet`]. A record is moved into its cycle and handed
//! back when the cycle completes.

use crate::events::{EventKind, EventSender, ResourceEvent};
use crate::reconciler::Reconciler;
use crate::record::{Phase, ReconciliationRecord};
use crate::types::{ResourceKey, ServiceSpec};
use async_trait::async_trait;
use nslice_orch_common::{Consumer, KeyedTask, Operation, Orch};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info};

enum Cycle {
    Reconcile { spec: ServiceSpec, generation: u64 },
    Delete,
    Drift,
    Heal,
}

impl Cycle {
    fn name(&self) -> &'static str {
        match self {
            Cycle::Reconcile { .. } => "reconcile",
            Cycle::Delete => "delete",
            Cycle::Drift => "drift",
            Cycle::Heal => "heal",
        }
    }
}

struct CycleDone {
    record: ReconciliationRecord,
    removed: bool,
    heal_needed: bool,
}

/// Orch driving every service resource.
pub struct SliceMgr {
    reconciler: Arc<Reconciler>,
    /// Records not currently owned by a cycle.
    records: HashMap<ResourceKey, ReconciliationRecord>,
    in_flight: HashSet<ResourceKey>,
    events: Consumer<ResourceKey, ResourceEvent>,
    rx: mpsc::UnboundedReceiver<ResourceEvent>,
    drift_due: BTreeSet<ResourceKey>,
    heal_due: BTreeSet<ResourceKey>,
    cycles: JoinSet<CycleDone>,
    task_keys: HashMap<task::Id, ResourceKey>,
}

impl SliceMgr {
    /// Creates the orch and the sender feeding it.
    pub fn new(reconciler: Reconciler) -> (Self, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = EventSender::new(tx, reconciler.watermark());
        let mgr = Self {
            reconciler: Arc::new(reconciler),
            records: HashMap::new(),
            in_flight: HashSet::new(),
            events: Consumer::new("SERVICE_EVENTS"),
            rx,
            drift_due: BTreeSet::new(),
            heal_due: BTreeSet::new(),
            cycles: JoinSet::new(),
            task_keys: HashMap::new(),
        };
        (mgr, sender)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Record of an idle resource.
    pub fn record(&self, key: &ResourceKey) -> Option<&ReconciliationRecord> {
        self.records.get(key)
    }

    pub fn phase(&self, key: &ResourceKey) -> Option<Phase> {
        self.records.get(key).map(|r| r.phase)
    }

    /// Number of known resources, idle or in a cycle.
    pub fn len(&self) -> usize {
        self.records.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no cycle runs and nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.cycles.is_empty()
            && !self.events.has_pending()
            && self.drift_due.is_empty()
            && self.heal_due.is_empty()
            && self.rx.is_empty()
    }

    fn enqueue(&mut self, event: ResourceEvent) {
        self.events.add_to_sync([event.into_task()]);
    }

    fn collect_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.enqueue(event);
        }
    }

    fn complete(&mut self, joined: Result<(task::Id, CycleDone), JoinError>) {
        match joined {
            Ok((id, done)) => {
                self.task_keys.remove(&id);
                let key = done.record.key.clone();
                self.in_flight.remove(&key);
                if done.removed {
                    self.drift_due.remove(&key);
                    self.heal_due.remove(&key);
                    return;
                }
                if done.heal_needed {
                    self.heal_due.insert(key.clone());
                }
                self.records.insert(key, done.record);
            }
            Err(e) => {
                if let Some(key) = self.task_keys.remove(&e.id()) {
                    error!(key = %key, error = %e, "cycle aborted, record dropped");
                    self.in_flight.remove(&key);
                }
            }
        }
    }

    fn collect_finished(&mut self) {
        while let Some(joined) = self.cycles.try_join_next_with_id() {
            self.complete(joined);
        }
    }

    fn spawn(&mut self, mut record: ReconciliationRecord, cycle: Cycle) {
        let key = record.key.clone();
        debug!(key = %key, cycle = cycle.name(), "starting cycle");
        let reconciler = Arc::clone(&self.reconciler);
        let handle = self.cycles.spawn(async move {
            let mut removed = false;
            let mut heal_needed = false;
            match cycle {
                Cycle::Reconcile { spec, generation } => {
                    reconciler.reconcile(&mut record, spec, generation).await
                }
                Cycle::Delete => removed = reconciler.delete(&mut record).await,
                Cycle::Drift => heal_needed = reconciler.detect_drift(&mut record).await,
                Cycle::Heal => reconciler.heal(&mut record).await,
            }
            CycleDone {
                record,
                removed,
                heal_needed,
            }
        });
        self.in_flight.insert(key.clone());
        self.task_keys.insert(handle.id(), key);
    }

    fn dispatch_event(&mut self, task: KeyedTask<ResourceKey, ResourceEvent>) {
        let event = task.payload;
        match task.op {
            Operation::Del => match self.records.remove(&event.key) {
                Some(record) => self.spawn(record, Cycle::Delete),
                None => {
                    // nothing was applied, so nothing will forget the delete mark
                    debug!(key = %event.key, "delete for unknown resource ignored");
                    self.reconciler.watermark().forget(&event.key);
                }
            },
            Operation::Set => {
                let record = match self.records.remove(&event.key) {
                    Some(record) => record,
                    None if event.kind == EventKind::Resync => {
                        debug!(key = %event.key, "resync for unknown resource ignored");
                        return;
                    }
                    None => ReconciliationRecord::new(event.key.clone(), event.spec.clone()),
                };
                self.spawn(
                    record,
                    Cycle::Reconcile {
                        spec: event.spec,
                        generation: event.generation,
                    },
                );
            }
        }
    }

    /// Starts cycles for every ready resource: queued events first, then
    /// heals, then drift checks.
    fn dispatch(&mut self) {
        let in_flight = &self.in_flight;
        let ready = self.events.pop_ready(|key| !in_flight.contains(key));
        for task in ready {
            self.dispatch_event(task);
        }

        for key in std::mem::take(&mut self.heal_due) {
            if self.in_flight.contains(&key) || self.events.contains_key(&key) {
                self.heal_due.insert(key);
                continue;
            }
            if let Some(record) = self.records.remove(&key) {
                self.spawn(record, Cycle::Heal);
            }
        }

        for key in std::mem::take(&mut self.drift_due) {
            if self.in_flight.contains(&key) || self.events.contains_key(&key) {
                self.drift_due.insert(key);
                continue;
            }
            if let Some(record) = self.records.remove(&key) {
                self.spawn(record, Cycle::Drift);
            }
        }
    }

    /// Queues a resync for every idle resource that is not converged, and
    /// a retry for every unfinished teardown.
    pub fn schedule_resync(&mut self) {
        let mut tasks = Vec::new();
        for (key, record) in &self.records {
            if self.events.contains_key(key) {
                continue;
            }
            if record.deletion_requested {
                let event = ResourceEvent::new(key.clone(), EventKind::Delete, record.spec.clone(), record.generation);
                tasks.push(event.into_task());
            } else if !record.is_converged() {
                let event = ResourceEvent::new(key.clone(), EventKind::Resync, record.spec.clone(), record.generation);
                tasks.push(event.into_task());
            }
        }
        if !tasks.is_empty() {
            info!(count = tasks.len(), "scheduling resync");
            self.events.add_to_sync(tasks);
        }
    }

    /// Waits until an event arrives or a cycle completes.
    pub async fn next_activity(&mut self) {
        tokio::select! {
            Some(event) = self.rx.recv() => self.enqueue(event),
            Some(joined) = self.cycles.join_next_with_id() => self.complete(joined),
            else => std::future::pending::<()>().await,
        }
    }

    /// Waits for every running cycle without starting new ones.
    pub async fn drain_in_flight(&mut self) {
        while let Some(joined) = self.cycles.join_next_with_id().await {
            self.complete(joined);
        }
    }

    /// Processes until nothing is queued or running.
    pub async fn run_until_idle(&mut self) {
        loop {
            self.do_task().await;
            if self.is_idle() {
                break;
            }
            self.next_activity().await;
        }
    }
}

#[async_trait]
impl Orch for SliceMgr {
    fn name(&self) -> &str {
        "SliceMgr"
    }

    async fn do_task(&mut self) {
        self.collect_events();
        self.collect_finished();
        self.dispatch();
    }

    fn has_pending_tasks(&self) -> bool {
        !self.is_idle()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut lines = self.events.dump();
        lines.extend(self.in_flight.iter().map(|k| format!("{}: IN_FLIGHT", k)));
        lines
    }

    /// Marks every resource due for a drift check.
    fn on_timer(&mut self) {
        self.drift_due.extend(self.records.keys().cloned());
        self.drift_due.extend(self.in_flight.iter().cloned());
    }

    fn on_resync(&mut self) {
        self.schedule_resync();
    }
}
