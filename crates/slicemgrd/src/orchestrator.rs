//! Multi-device apply.
//!
//! Each device's op set is self-contained, so devices are applied with
//! bounded parallelism and in no particular order. A failure on one device
//! never rolls back another.

use crate::error::ErrorKind;
use crate::gateway::{DeviceLease, DeviceSessions, GatewayError};
use crate::intended::{ConfigEntry, ConfigPath, ConfigValue, DeviceOps};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use nslice_orch_common::{retry_with_backoff, RetryPolicy};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default number of devices applied concurrently.
pub const DEFAULT_FANOUT: usize = 4;

/// Why a device's op set could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} after {attempts} attempt(s): {source}")]
pub struct DeviceFailure {
    pub kind: ErrorKind,
    #[source]
    pub source: GatewayError,
    pub attempts: u32,
}

/// Outcome of one device's op set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResult {
    pub router: String,
    pub outcome: Result<(), DeviceFailure>,
}

impl DeviceResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Failure of a single attempt.
#[derive(Debug)]
struct AttemptError {
    /// Some writes landed before the failure.
    partial: bool,
    source: GatewayError,
}

impl AttemptError {
    fn clean(source: GatewayError) -> Self {
        Self {
            partial: false,
            source,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partial {
            write!(f, "partially applied: {}", self.source)
        } else {
            self.source.fmt(f)
        }
    }
}

/// Compensating write recorded while applying path by path.
enum Undo {
    Restore(ConfigEntry),
    Remove(ConfigPath),
}

/// Applies per-device op sets through the session pool.
pub struct Orchestrator {
    sessions: Arc<DeviceSessions>,
    retry: RetryPolicy,
    fanout: usize,
}

impl Orchestrator {
    pub fn new(sessions: Arc<DeviceSessions>) -> Self {
        Self {
            sessions,
            retry: RetryPolicy::default(),
            fanout: DEFAULT_FANOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    pub fn sessions(&self) -> &Arc<DeviceSessions> {
        &self.sessions
    }

    /// Applies every op set and returns one result per device, sorted by router.
    pub async fn apply(&self, ops: &[DeviceOps]) -> Vec<DeviceResult> {
        // built up front so the cycle future stays Send
        let pending: Vec<BoxFuture<'_, DeviceResult>> = ops
            .iter()
            .filter(|op| !op.is_empty())
            .map(|op| self.apply_device(op).boxed())
            .collect();
        let mut results: Vec<DeviceResult> = stream::iter(pending)
            .buffer_unordered(self.fanout)
            .collect()
            .await;
        results.sort_by(|a, b| a.router.cmp(&b.router));
        results
    }

    #[instrument(skip(self, op), fields(router = %op.router, updates = op.updates.len(), deletes = op.deletes.len()))]
    async fn apply_device(&self, op: &DeviceOps) -> DeviceResult {
        let sessions = self.sessions.as_ref();
        let result = retry_with_backoff(
            &self.retry,
            |e: &AttemptError| e.source.is_retryable(),
            |_| apply_once(sessions, op),
        )
        .await;

        let outcome = match result {
            Ok(()) => {
                debug!("device converged");
                Ok(())
            }
            Err(err) => {
                let kind = if err.last.partial {
                    ErrorKind::PartialApplyFailure
                } else {
                    err.last.source.kind()
                };
                warn!(attempts = err.attempts, error = %err.last, "device apply failed");
                Err(DeviceFailure {
                    kind,
                    source: err.last.source,
                    attempts: err.attempts,
                })
            }
        };

        DeviceResult {
            router: op.router.clone(),
            outcome,
        }
    }
}

async fn apply_once(sessions: &DeviceSessions, op: &DeviceOps) -> Result<(), AttemptError> {
    let mut lease = sessions.lease(&op.router).await;
    let caps = lease.capabilities().await.map_err(AttemptError::clean)?;
    if caps.atomic_set {
        lease
            .set(&op.updates, &op.deletes)
            .await
            .map_err(AttemptError::clean)?;
        return Ok(());
    }
    apply_paths(&mut lease, op).await
}

/// Writes one path per `Set`, deletes first, rolling back on failure.
async fn apply_paths(lease: &mut DeviceLease<'_>, op: &DeviceOps) -> Result<(), AttemptError> {
    let snapshot: HashMap<ConfigPath, Option<ConfigValue>> = lease
        .get(&op.touched_paths())
        .await
        .map_err(AttemptError::clean)?
        .into_iter()
        .collect();
    let previous = |path: &ConfigPath| snapshot.get(path).cloned().flatten();

    let mut undo = Vec::new();
    for path in &op.deletes {
        if let Err(source) = lease.set(&[], std::slice::from_ref(path)).await {
            return Err(rollback(lease, undo, source).await);
        }
        if let Some(value) = previous(path) {
            undo.push(Undo::Restore(ConfigEntry::new(path.clone(), value)));
        }
    }
    for entry in &op.updates {
        if let Err(source) = lease.set(std::slice::from_ref(entry), &[]).await {
            return Err(rollback(lease, undo, source).await);
        }
        undo.push(match previous(&entry.path) {
            Some(value) => Undo::Restore(ConfigEntry::new(entry.path.clone(), value)),
            None => Undo::Remove(entry.path.clone()),
        });
    }
    Ok(())
}

/// Best-effort restore of the pre-apply snapshot, newest write first.
///
/// Children of a deleted subtree are not part of the snapshot and stay gone.
async fn rollback(lease: &mut DeviceLease<'_>, undo: Vec<Undo>, source: GatewayError) -> AttemptError {
    let partial = !undo.is_empty();
    if partial {
        info!(router = lease.router(), writes = undo.len(), "rolling back partial apply");
    }
    for step in undo.into_iter().rev() {
        let result = match &step {
            Undo::Restore(entry) => lease.set(std::slice::from_ref(entry), &[]).await,
            Undo::Remove(path) => lease.set(&[], std::slice::from_ref(path)).await,
        };
        if let Err(e) = result {
            warn!(router = lease.router(), error = %e, "rollback step failed");
        }
    }
    AttemptError { partial, source }
}
