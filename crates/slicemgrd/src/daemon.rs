//! SliceDaemon - the main event loop.
//!
//! Runs [`SliceMgr`] on queued events and cycle completions, fires the drift
//! and resync timers, and stops on the shutdown signal after letting running
//! cycles finish.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::slice_mgr::SliceMgr;
use nslice_orch_common::Orch;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Timer settings of the daemon loop.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Period of drift checks across all resources.
    pub drift_interval: Duration,
    /// Period of resyncs for unconverged resources and unfinished teardowns.
    pub resync_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            drift_interval: Duration::from_secs(300),
            resync_interval: Duration::from_secs(60),
        }
    }
}

pub struct SliceDaemon {
    config: DaemonConfig,
    mgr: SliceMgr,
    shutdown: watch::Receiver<bool>,
}

impl SliceDaemon {
    pub fn new(config: DaemonConfig, mgr: SliceMgr, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            config,
            mgr,
            shutdown,
        }
    }

    pub fn mgr(&self) -> &SliceMgr {
        &self.mgr
    }

    /// Runs until shutdown is signalled, then returns the orch.
    pub async fn run(mut self) -> SliceMgr {
        info!(
            drift_secs = self.config.drift_interval.as_secs(),
            resync_secs = self.config.resync_interval.as_secs(),
            "starting slice daemon"
        );
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "SliceDaemon", "event_loop_started")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "drift_interval_secs": self.config.drift_interval.as_secs(),
                "resync_interval_secs": self.config.resync_interval.as_secs(),
            })));

        let start = Instant::now();
        let mut drift = interval_at(start + self.config.drift_interval, self.config.drift_interval);
        drift.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resync = interval_at(start + self.config.resync_interval, self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.mgr.do_task().await;

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = drift.tick() => self.mgr.on_timer(),
                _ = resync.tick() => self.mgr.on_resync(),
                _ = self.mgr.next_activity() => {}
            }
        }

        info!(in_flight = self.mgr.dump_pending_tasks().len(), "stopping, waiting for running cycles");
        self.mgr.drain_in_flight().await;

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "SliceDaemon", "event_loop_stopped")
            .with_outcome(AuditOutcome::Success));
        self.mgr
    }
}
