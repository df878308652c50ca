//! Network Slice Reconciler
//!
//! Keeps declarative VPLS, VPRN and ePipe services converged on a fleet of
//! routers reached through a gNMI-shaped device gateway: compiles each spec
//! into per-device configuration, applies it across devices, detects and
//! heals drift, and reports per-endpoint status.

pub mod audit;
pub mod claims;
pub mod compiler;
pub mod config;
pub mod daemon;
pub mod drift;
pub mod error;
pub mod events;
pub mod gateway;
pub mod intended;
pub mod manifest;
pub mod orchestrator;
pub mod reconciler;
pub mod record;
pub mod slice_mgr;
pub mod status;
pub mod types;

pub use audit::{init_logging, AuditCategory, AuditOutcome, AuditRecord, LogFormat};
pub use claims::ClaimRegistry;
pub use compiler::{compile, intended_config, plan, teardown_plan, CompileError, CompiledService};
pub use config::SliceMgrConfig;
pub use daemon::{DaemonConfig, SliceDaemon};
pub use drift::{oper_state_path, DriftDetector, DriftReport, DriftedPath};
pub use error::{EndpointError, ErrorKind, Result, SliceMgrError};
pub use events::{EventKind, EventSender, GenerationWatermark, ResourceEvent};
pub use gateway::{
    Capabilities, CredentialResolver, Credentials, DeviceGateway, DeviceRef, DeviceSessions,
    GatewayError, MemoryGateway, StaticCredentials,
};
pub use intended::{ConfigPath, ConfigValue, DeviceConfig, DeviceOps, IntendedConfig};
pub use manifest::load_manifests;
pub use orchestrator::{DeviceFailure, DeviceResult, Orchestrator};
pub use reconciler::Reconciler;
pub use record::{EndpointState, EndpointStatus, OperState, Phase, ReconciliationRecord};
pub use slice_mgr::SliceMgr;
pub use status::{
    aggregate, aggregate_oper, JsonFileStatusSink, MemoryStatusSink, StatusDocument, StatusSink,
};
pub use types::{Endpoint, EndpointKey, ResourceKey, ServiceManifest, ServiceSpec};
