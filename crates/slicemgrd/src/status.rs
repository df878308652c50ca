//! Status aggregation and publication.

use crate::error::{Result, SliceMgrError};
use crate::record::{EndpointState, EndpointStatus, OperState, Phase, ReconciliationRecord};
use crate::types::{EndpointKey, ResourceKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Resource-level view of the endpoint outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub phase: Phase,
    pub oper_state: OperState,
    pub endpoints: Vec<(EndpointKey, EndpointStatus)>,
    /// Most recent endpoint error, rendered.
    pub last_error: Option<String>,
}

/// Folds endpoint states into a phase.
///
/// `Unknown` endpoints carry no information and do not move the phase; a
/// set made only of them reads as `Active`, and `Failed` mixed only with
/// `Unknown` reads as `Error`.
pub fn aggregate(endpoints: &BTreeMap<EndpointKey, EndpointStatus>) -> StatusSummary {
    let known: Vec<EndpointState> = endpoints
        .values()
        .map(|s| s.state)
        .filter(|s| *s != EndpointState::Unknown)
        .collect();

    let phase = if endpoints.is_empty() {
        Phase::Pending
    } else if known.iter().all(|s| *s == EndpointState::Applied) {
        Phase::Active
    } else if known.iter().all(|s| *s == EndpointState::Failed) {
        Phase::Error
    } else {
        Phase::Degraded
    };

    let last_error = endpoints
        .iter()
        .filter_map(|(key, status)| {
            status
                .last_error
                .as_ref()
                .map(|e| (status.last_transition_time, format!("{}: {}", key, e)))
        })
        .max_by_key(|(at, _)| *at)
        .map(|(_, message)| message);

    StatusSummary {
        phase,
        oper_state: aggregate_oper(endpoints),
        endpoints: endpoints
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect(),
        last_error,
    }
}

/// Folds endpoint operational states: any `Down` wins, then any `Unknown`.
pub fn aggregate_oper(endpoints: &BTreeMap<EndpointKey, EndpointStatus>) -> OperState {
    let states: Vec<OperState> = endpoints.values().map(|s| s.oper_state).collect();
    if states.contains(&OperState::Down) {
        OperState::Down
    } else if states.is_empty() || states.contains(&OperState::Unknown) {
        OperState::Unknown
    } else {
        OperState::Up
    }
}

/// Status of one endpoint as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointReport {
    pub endpoint: String,
    pub state: EndpointState,
    #[serde(default)]
    pub oper_state: OperState,
    pub last_error: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

/// Status document written back for each resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    pub phase: Phase,
    /// Service operational state, independent of config convergence.
    #[serde(default)]
    pub operational_status: OperState,
    pub generation: u64,
    pub per_endpoint: Vec<EndpointReport>,
    pub last_reconcile_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StatusDocument {
    pub fn from_record(record: &ReconciliationRecord) -> Self {
        Self {
            phase: record.phase,
            operational_status: aggregate_oper(&record.endpoints),
            generation: record.generation,
            per_endpoint: record
                .endpoints
                .iter()
                .map(|(key, status)| EndpointReport {
                    endpoint: key.to_string(),
                    state: status.state,
                    oper_state: status.oper_state,
                    last_error: status.last_error.as_ref().map(ToString::to_string),
                    last_transition_time: status.last_transition_time,
                })
                .collect(),
            last_reconcile_time: record.last_reconcile_time,
            last_error: record.last_error.clone(),
        }
    }
}

/// Destination for status documents.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, key: &ResourceKey, status: &StatusDocument) -> Result<()>;

    /// Called once the resource is gone.
    async fn remove(&self, key: &ResourceKey) -> Result<()>;
}

/// Keeps the latest document per resource plus the phase history.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    documents: Mutex<BTreeMap<ResourceKey, StatusDocument>>,
    history: Mutex<BTreeMap<ResourceKey, Vec<Phase>>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<StatusDocument> {
        self.documents.lock().get(key).cloned()
    }

    /// Every phase published for `key`, in order.
    pub fn phases(&self, key: &ResourceKey) -> Vec<Phase> {
        self.history.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.documents.lock().contains_key(key)
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn publish(&self, key: &ResourceKey, status: &StatusDocument) -> Result<()> {
        self.documents.lock().insert(key.clone(), status.clone());
        self.history
            .lock()
            .entry(key.clone())
            .or_default()
            .push(status.phase);
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> Result<()> {
        self.documents.lock().remove(key);
        Ok(())
    }
}

/// Writes `<dir>/<namespace>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStatusSink {
    dir: PathBuf,
}

impl JsonFileStatusSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &ResourceKey) -> PathBuf {
        self.dir
            .join(&key.namespace)
            .join(format!("{}.json", key.name))
    }

    async fn write_atomic(path: &Path, contents: Vec<u8>) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SliceMgrError::io(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| SliceMgrError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SliceMgrError::io(path, e))
    }
}

#[async_trait]
impl StatusSink for JsonFileStatusSink {
    async fn publish(&self, key: &ResourceKey, status: &StatusDocument) -> Result<()> {
        let contents =
            serde_json::to_vec_pretty(status).map_err(|e| SliceMgrError::status(key, e.to_string()))?;
        Self::write_atomic(&self.path_for(key), contents).await
    }

    async fn remove(&self, key: &ResourceKey) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SliceMgrError::io(path, e)),
        }
    }
}
