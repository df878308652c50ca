//! Per-resource reconciliation cycles.
//!
//! Each method runs one cycle against a record the caller owns exclusively:
//! apply a spec generation, check drift, heal drifted paths, or tear the
//! service down. Device outcomes are folded into endpoint states and the
//! phase is derived from those, then published.
//!
//! A cycle whose generation was superseded while it waited on devices still
//! records what landed on each device, so later plans and teardowns see the
//! truth, but its status results are dropped.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::claims::ClaimRegistry;
use crate::compiler::{self, CompileError, CompiledService};
use crate::drift::{DriftDetector, DriftReport};
use crate::error::{EndpointError, ErrorKind};
use crate::events::GenerationWatermark;
use crate::intended::{DeviceConfig, DeviceOps};
use crate::orchestrator::{DeviceResult, Orchestrator};
use crate::record::{AppliedConfig, EndpointState, OperState, Phase, ReconciliationRecord};
use crate::status::{aggregate, StatusDocument, StatusSink};
use crate::types::ServiceSpec;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const SOURCE: &str = "Reconciler";

/// Drives cycles for any number of resources.
pub struct Reconciler {
    orchestrator: Orchestrator,
    detector: DriftDetector,
    claims: ClaimRegistry,
    watermark: Arc<GenerationWatermark>,
    sink: Arc<dyn StatusSink>,
}

impl Reconciler {
    pub fn new(orchestrator: Orchestrator, detector: DriftDetector, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            orchestrator,
            detector,
            claims: ClaimRegistry::new(),
            watermark: Arc::new(GenerationWatermark::new()),
            sink,
        }
    }

    pub fn watermark(&self) -> Arc<GenerationWatermark> {
        Arc::clone(&self.watermark)
    }

    pub fn claims(&self) -> &ClaimRegistry {
        &self.claims
    }

    async fn publish(&self, record: &ReconciliationRecord) {
        let document = StatusDocument::from_record(record);
        if let Err(e) = self.sink.publish(&record.key, &document).await {
            warn!(key = %record.key, error = %e, "status publish failed");
        }
    }

    /// Derives the phase from endpoint states and publishes.
    async fn finish(&self, record: &mut ReconciliationRecord, now: DateTime<Utc>, extra_error: Option<String>) {
        let summary = aggregate(&record.endpoints);
        record.phase = summary.phase;
        record.last_error = summary.last_error.or(extra_error);
        record.last_reconcile_time = Some(now);
        self.publish(record).await;
    }

    fn compile_and_claim(&self, record: &ReconciliationRecord) -> Result<CompiledService, CompileError> {
        let compiled = compiler::compile(&record.spec, &record.prior_configs())?;
        self.claims.claim(&record.key, compiler::claims(&record.spec)?)?;
        Ok(compiled)
    }

    async fn reject(&self, record: &mut ReconciliationRecord, err: CompileError, now: DateTime<Utc>) {
        warn!(key = %record.key, error = %err, "spec rejected");
        let error = EndpointError::new(ErrorKind::InvalidSpec, err.reason());
        for key in record.spec.endpoint_keys() {
            record.set_endpoint(key, EndpointState::Failed, Some(error.clone()), now);
        }
        record.retain_spec_endpoints();
        record.phase = Phase::Error;
        record.last_error = Some(err.to_string());
        record.last_reconcile_time = Some(now);

        audit_log!(AuditRecord::new(AuditCategory::SpecRejected, SOURCE, "compile")
            .with_resource(&record.key)
            .with_generation(record.generation)
            .with_error(&err));
        self.publish(record).await;
    }

    /// True if `op`'s device already holds the current generation.
    fn converged(record: &ReconciliationRecord, op: &DeviceOps) -> bool {
        record.intended.device(&op.router).is_some()
            && record
                .applied
                .get(&op.router)
                .is_some_and(|a| a.generation == record.generation)
            && record.router_applied(&op.router)
    }

    /// Records what landed on each device.
    ///
    /// A failed delete-only op keeps the device in `applied` so its removal
    /// is retried.
    fn absorb(record: &mut ReconciliationRecord, results: &[DeviceResult], prior: &BTreeMap<String, DeviceConfig>) {
        for result in results {
            let router = &result.router;
            match (&result.outcome, record.intended.device(router)) {
                (Ok(()), Some(config)) => {
                    let applied = AppliedConfig {
                        generation: record.generation,
                        config: config.clone(),
                    };
                    record.applied.insert(router.clone(), applied);
                }
                (Ok(()), None) => {
                    record.applied.remove(router);
                }
                (Err(_), None) => {
                    if let (false, Some(config)) = (record.applied.contains_key(router), prior.get(router)) {
                        // generation 0: never confirmed on the device
                        let orphan = AppliedConfig {
                            generation: 0,
                            config: config.clone(),
                        };
                        record.applied.insert(router.clone(), orphan);
                    }
                }
                (Err(_), Some(_)) => {}
            }
        }
    }

    /// Applies `spec` at `generation`.
    ///
    /// A generation equal to the record's converges only the devices not yet
    /// applied at it; an older one is dropped.
    #[instrument(skip_all, fields(key = %record.key, generation = generation))]
    pub async fn reconcile(&self, record: &mut ReconciliationRecord, spec: ServiceSpec, generation: u64) {
        if record.deletion_requested {
            warn!("ignoring spec for a resource being deleted");
            return;
        }
        if generation < record.generation {
            debug!(current = record.generation, "dropping stale generation");
            return;
        }

        let fresh = generation > record.generation || record.phase == Phase::Pending;
        let first_apply = record.applied.is_empty();
        if fresh {
            record.spec = spec;
            record.generation = generation;
        }

        let now = Utc::now();
        let prior = record.prior_configs();
        let compiled = match self.compile_and_claim(record) {
            Ok(compiled) => compiled,
            Err(e) => {
                self.reject(record, e, now).await;
                return;
            }
        };

        record.intended = compiled.intended;
        record.retain_spec_endpoints();
        let ops: Vec<DeviceOps> = compiled
            .ops
            .into_iter()
            .filter(|op| fresh || !Self::converged(record, op))
            .collect();

        if !ops.is_empty() {
            info!(devices = ops.len(), fresh, "applying");
            record.phase = Phase::Provisioning;
            self.publish(record).await;
        }

        let results = self.orchestrator.apply(&ops).await;
        Self::absorb(record, &results, &prior);

        if self.watermark.is_superseded(&record.key, record.generation) {
            debug!("superseded while applying, dropping status");
            return;
        }

        let mut orphan_error = None;
        let mut applied_any = false;
        for result in &results {
            match &result.outcome {
                Ok(()) => {
                    applied_any = true;
                    record.set_router_state(&result.router, EndpointState::Applied, None, now);
                    record.pending_heal.remove(&result.router);
                }
                Err(failure) => {
                    let error = EndpointError::new(failure.kind, failure.to_string());
                    if record.intended.device(&result.router).is_none() {
                        orphan_error = Some(format!("{}: {}", result.router, error));
                    }
                    record.set_router_state(&result.router, EndpointState::Failed, Some(error), now);
                    audit_log!(AuditRecord::new(AuditCategory::DeviceWrite, SOURCE, "apply")
                        .with_resource(&record.key)
                        .with_router(&result.router)
                        .with_generation(record.generation)
                        .with_error(failure));
                }
            }
        }

        if applied_any {
            let category = if first_apply {
                AuditCategory::ServiceProvision
            } else {
                AuditCategory::ServiceModify
            };
            let routers: Vec<&str> = results
                .iter()
                .filter(|r| r.is_ok())
                .map(|r| r.router.as_str())
                .collect();
            audit_log!(AuditRecord::new(category, SOURCE, "apply")
                .with_outcome(AuditOutcome::Success)
                .with_resource(&record.key)
                .with_generation(record.generation)
                .with_details(serde_json::json!({ "routers": routers })));
        }

        self.finish(record, now, orphan_error).await;
        info!(phase = %record.phase, "reconciled");
    }

    /// Checks every device applied at the current generation.
    ///
    /// Returns true if drifted paths are waiting for a heal cycle.
    #[instrument(skip_all, fields(key = %record.key))]
    pub async fn detect_drift(&self, record: &mut ReconciliationRecord) -> bool {
        if record.deletion_requested || !record.phase.is_steady() {
            return false;
        }
        let targets = record.current_applied();
        if targets.is_empty() {
            return false;
        }

        let reports = self.detector.detect_all(&targets).await;
        let opers = self.detector.oper_states(targets.keys(), record.spec.service_id).await;
        if self.watermark.is_superseded(&record.key, record.generation) {
            return false;
        }

        let now = Utc::now();
        for (router, report) in reports {
            match report {
                DriftReport::InSync => {
                    record.pending_heal.remove(&router);
                    record.set_router_state(&router, EndpointState::Applied, None, now);
                }
                DriftReport::Drifted(drifted) => {
                    info!(router = %router, paths = drifted.len(), "drift detected");
                    let error = EndpointError::new(
                        ErrorKind::ConfigDrift,
                        format!("{} managed path(s) diverged", drifted.len()),
                    );
                    record.set_router_state(&router, EndpointState::Drifted, Some(error), now);
                    record
                        .pending_heal
                        .insert(router.clone(), drifted.into_iter().map(|d| d.path).collect());
                }
                DriftReport::Unknown(e) => {
                    let error = EndpointError::new(ErrorKind::DriftUnknown, e.to_string());
                    record.set_router_state(&router, EndpointState::Unknown, Some(error), now);
                }
            }
            let oper = opers.get(&router).copied().unwrap_or(OperState::Unknown);
            if oper == OperState::Down {
                debug!(router = %router, "service operationally down");
            }
            record.set_router_oper(&router, oper);
        }

        self.finish(record, now, None).await;
        !record.pending_heal.is_empty()
    }

    /// Re-applies exactly the drifted paths from the last applied config.
    #[instrument(skip_all, fields(key = %record.key))]
    pub async fn heal(&self, record: &mut ReconciliationRecord) {
        if record.deletion_requested || record.pending_heal.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut record.pending_heal);
        let ops: Vec<DeviceOps> = pending
            .iter()
            .filter_map(|(router, paths)| {
                record
                    .applied
                    .get(router)
                    .map(|applied| compiler::heal_plan(router, &applied.config, paths))
            })
            .filter(|op| !op.is_empty())
            .collect();

        let results = self.orchestrator.apply(&ops).await;
        if self.watermark.is_superseded(&record.key, record.generation) {
            return;
        }

        let now = Utc::now();
        for result in &results {
            let audit = AuditRecord::new(AuditCategory::DriftHeal, SOURCE, "heal")
                .with_resource(&record.key)
                .with_router(&result.router)
                .with_generation(record.generation);
            match &result.outcome {
                Ok(()) => {
                    record.set_router_state(&result.router, EndpointState::Applied, None, now);
                    let paths = pending.get(&result.router).map_or(0, Vec::len);
                    audit_log!(audit
                        .with_outcome(AuditOutcome::Success)
                        .with_details(serde_json::json!({ "paths": paths })));
                }
                Err(failure) => {
                    let error = EndpointError::new(failure.kind, failure.to_string());
                    record.set_router_state(&result.router, EndpointState::Failed, Some(error), now);
                    audit_log!(audit.with_error(failure));
                }
            }
        }

        self.finish(record, now, None).await;
    }

    /// Tears the service down. Returns true once nothing is left on any
    /// device and the record can be dropped.
    #[instrument(skip_all, fields(key = %record.key))]
    pub async fn delete(&self, record: &mut ReconciliationRecord) -> bool {
        if !record.deletion_requested {
            record.deletion_requested = true;
            record.teardown = record.teardown_targets();
            record.pending_heal.clear();
            audit_log!(AuditRecord::new(AuditCategory::ServiceTeardown, SOURCE, "teardown")
                .with_resource(&record.key)
                .with_details(serde_json::json!({ "routers": record.teardown.keys().collect::<Vec<_>>() })));
        }
        record.teardown.retain(|_, config| !config.is_empty());
        record.phase = Phase::Deleting;
        self.publish(record).await;

        let results = self.orchestrator.apply(&compiler::teardown_plan(&record.teardown)).await;

        let now = Utc::now();
        let mut failures = Vec::new();
        for result in &results {
            match &result.outcome {
                Ok(()) => {
                    record.teardown.remove(&result.router);
                    record.applied.remove(&result.router);
                    record.endpoints.retain(|k, _| k.router != result.router);
                }
                Err(failure) => {
                    let error = EndpointError::new(ErrorKind::DeleteFailure, failure.to_string());
                    failures.push(format!("{}: {}", result.router, error));
                    record.set_router_state(&result.router, EndpointState::Failed, Some(error), now);
                }
            }
        }

        if record.teardown.is_empty() {
            self.claims.release(&record.key);
            self.watermark.forget(&record.key);
            if let Err(e) = self.sink.remove(&record.key).await {
                warn!(error = %e, "status removal failed");
            }
            audit_log!(AuditRecord::new(AuditCategory::ServiceTeardown, SOURCE, "teardown")
                .with_outcome(AuditOutcome::Success)
                .with_resource(&record.key));
            info!("service removed");
            return true;
        }

        let remaining: Vec<&String> = record.teardown.keys().collect();
        warn!(?remaining, "teardown incomplete, will retry");
        audit_log!(AuditRecord::new(AuditCategory::ServiceTeardown, SOURCE, "teardown")
            .with_resource(&record.key)
            .with_error(failures.join("; ")));
        record.phase = Phase::Deleting;
        record.last_error = failures.into_iter().next();
        record.last_reconcile_time = Some(now);
        self.publish(record).await;
        false
    }
}
