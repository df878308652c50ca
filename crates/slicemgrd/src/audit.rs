//! Structured audit trail for device-affecting actions.
//!
//! Every write the reconciler makes to a router, every teardown and every
//! daemon lifecycle change is recorded as an [`AuditRecord`] and emitted on
//! the `audit` tracing target with the whole record attached as JSON.
//! Failures are logged at WARN, successes at INFO, anything else at DEBUG.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// First apply of a service to its devices.
    ServiceProvision,
    /// Apply of a later generation.
    ServiceModify,
    ServiceTeardown,
    /// Drifted paths were re-applied.
    DriftHeal,
    /// A write to a device failed.
    DeviceWrite,
    /// Rejected before any device was touched.
    SpecRejected,
    SystemLifecycle,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::ServiceProvision => "SERVICE_PROVISION",
            AuditCategory::ServiceModify => "SERVICE_MODIFY",
            AuditCategory::ServiceTeardown => "SERVICE_TEARDOWN",
            AuditCategory::DriftHeal => "DRIFT_HEAL",
            AuditCategory::DeviceWrite => "DEVICE_WRITE",
            AuditCategory::SpecRejected => "SPEC_REJECTED",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Started,
    Success,
    Failure,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditOutcome::Started => "started",
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        })
    }
}

/// One audit event, built with the `with_*` methods and handed to
/// [`audit_log!`](crate::audit_log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that produced the event (`Reconciler`, `SliceDaemon`).
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Resource key, `namespace/name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Starts a record stamped now, with outcome `Started`.
    pub fn new(category: AuditCategory, source: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::Started,
            resource: None,
            router: None,
            generation: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_resource(mut self, resource: impl fmt::Display) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches an error and marks the record failed.
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"audit serialization failed: {}"}}"#, e))
    }

    /// Logs the record on the `audit` target.
    pub fn emit(&self) {
        let resource = self.resource.as_deref().unwrap_or("");
        let router = self.router.as_deref().unwrap_or("");
        let json = self.to_json();
        match self.outcome {
            AuditOutcome::Failure => tracing::warn!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                resource,
                router,
                error = self.error.as_deref().unwrap_or(""),
                audit_json = %json,
                "{} {} failed",
                self.category,
                self.action
            ),
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                resource,
                router,
                audit_json = %json,
                "{} {}",
                self.category,
                self.action
            ),
            AuditOutcome::Started => tracing::debug!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                resource,
                audit_json = %json,
                "{} {} started",
                self.category,
                self.action
            ),
        }
    }
}

/// Emits an [`AuditRecord`](crate::audit::AuditRecord) on the `audit` target.
///
/// ```ignore
/// audit_log!(AuditRecord::new(AuditCategory::DriftHeal, "Reconciler", "heal")
///     .with_router("SR1")
///     .with_outcome(AuditOutcome::Success));
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

/// Log output of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Installs the global subscriber. `RUST_LOG` overrides `log_level`.
pub fn init_logging(log_level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(layer.with_thread_ids(true).json()).init(),
        LogFormat::Pretty => registry.with(layer.pretty()).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_builder() {
        let record = AuditRecord::new(AuditCategory::ServiceProvision, "Reconciler", "apply")
            .with_resource("default/blue")
            .with_router("SR1")
            .with_generation(3);
        assert_eq!(record.outcome, AuditOutcome::Started);

        let record = record.with_outcome(AuditOutcome::Success);
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.resource.as_deref(), Some("default/blue"));
        assert_eq!(record.router.as_deref(), Some("SR1"));
        assert_eq!(record.generation, Some(3));
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::DeviceWrite, "Reconciler", "set")
            .with_outcome(AuditOutcome::Success)
            .with_error("connection refused");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_json_skips_unset_fields() {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "SliceDaemon", "start")
            .with_outcome(AuditOutcome::Success);
        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(json["category"], "SYSTEM_LIFECYCLE");
        assert_eq!(json["outcome"], "success");
        assert!(json.get("router").is_none());
        assert!(json.get("error").is_none());

        let back: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.category, AuditCategory::SystemLifecycle);
    }

    #[test]
    fn test_emit_every_outcome() {
        for outcome in [AuditOutcome::Started, AuditOutcome::Success, AuditOutcome::Failure] {
            crate::audit_log!(AuditRecord::new(AuditCategory::DriftHeal, "test", "heal").with_outcome(outcome));
        }
    }
}
