//! Resource lifecycle events and generation tracking.

use crate::error::{Result, SliceMgrError};
use crate::types::{ResourceKey, ServiceSpec};
use nslice_orch_common::{Coalesce, KeyedTask};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Resync,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::Resync => "resync",
        };
        f.write_str(s)
    }
}

/// A lifecycle notification for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub key: ResourceKey,
    pub kind: EventKind,
    pub spec: ServiceSpec,
    pub generation: u64,
}

impl ResourceEvent {
    pub fn new(key: ResourceKey, kind: EventKind, spec: ServiceSpec, generation: u64) -> Self {
        Self {
            key,
            kind,
            spec,
            generation,
        }
    }

    /// Queue entry for this event; deletes clear pending sets.
    pub fn into_task(self) -> KeyedTask<ResourceKey, ResourceEvent> {
        match self.kind {
            EventKind::Delete => KeyedTask::del(self.key.clone(), self),
            _ => KeyedTask::set(self.key.clone(), self),
        }
    }
}

impl Coalesce for ResourceEvent {
    /// Keeps whichever event carries the newer generation.
    fn coalesce(&mut self, newer: Self) {
        if newer.generation >= self.generation {
            *self = newer;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mark {
    generation: u64,
    deleted: bool,
}

/// Newest generation seen per resource, shared with in-flight cycles so they
/// can tell when their work has gone stale.
#[derive(Debug, Default)]
pub struct GenerationWatermark {
    marks: Mutex<HashMap<ResourceKey, Mark>>,
}

impl GenerationWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an incoming event. A create seen after a delete starts a new
    /// incarnation, so the delete no longer supersedes it.
    pub fn observe(&self, key: &ResourceKey, generation: u64, kind: EventKind) {
        let mut marks = self.marks.lock();
        let mark = marks.entry(key.clone()).or_default();
        mark.generation = mark.generation.max(generation);
        match kind {
            EventKind::Delete => mark.deleted = true,
            EventKind::Create => mark.deleted = false,
            EventKind::Update | EventKind::Resync => {}
        }
    }

    pub fn latest(&self, key: &ResourceKey) -> Option<u64> {
        self.marks.lock().get(key).map(|m| m.generation)
    }

    /// True if a newer generation or a delete arrived after `generation`.
    pub fn is_superseded(&self, key: &ResourceKey, generation: u64) -> bool {
        self.marks
            .lock()
            .get(key)
            .is_some_and(|m| m.deleted || m.generation > generation)
    }

    /// Forgets a resource once its record is gone.
    pub fn forget(&self, key: &ResourceKey) {
        self.marks.lock().remove(key);
    }
}

/// Entry point for the external watch substrate.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ResourceEvent>,
    watermark: Arc<GenerationWatermark>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ResourceEvent>, watermark: Arc<GenerationWatermark>) -> Self {
        Self { tx, watermark }
    }

    pub fn send(&self, event: ResourceEvent) -> Result<()> {
        debug!(key = %event.key, kind = %event.kind, generation = event.generation, "event");
        self.watermark.observe(&event.key, event.generation, event.kind);
        self.tx.send(event).map_err(|_| SliceMgrError::QueueClosed)
    }

    pub fn on_create(&self, key: ResourceKey, spec: ServiceSpec, generation: u64) -> Result<()> {
        self.send(ResourceEvent::new(key, EventKind::Create, spec, generation))
    }

    pub fn on_update(
        &self,
        key: ResourceKey,
        old: &ServiceSpec,
        new: ServiceSpec,
        generation: u64,
    ) -> Result<()> {
        if old == &new {
            debug!(key = %key, generation, "update without spec change");
        }
        self.send(ResourceEvent::new(key, EventKind::Update, new, generation))
    }

    pub fn on_delete(&self, key: ResourceKey, spec: ServiceSpec, generation: u64) -> Result<()> {
        self.send(ResourceEvent::new(key, EventKind::Delete, spec, generation))
    }

    pub fn on_resync(&self, key: ResourceKey, spec: ServiceSpec, generation: u64) -> Result<()> {
        self.send(ResourceEvent::new(key, EventKind::Resync, spec, generation))
    }
}
