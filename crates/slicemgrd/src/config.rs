//! Configuration file support for slicemgrd.
//!
//! Loads and validates daemon configuration from TOML.
//! Default location: /etc/nslice/slicemgrd.toml

use crate::daemon::DaemonConfig;
use crate::error::{Result, SliceMgrError};
use crate::gateway::{Credentials, DeviceRef, StaticCredentials, DEFAULT_GNMI_PORT};
use nslice_orch_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nslice/slicemgrd.toml";

/// Reconciliation scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Devices written or read in parallel per cycle
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    #[serde(default = "default_drift_interval")]
    pub drift_interval_secs: u64,

    /// Retry period for unconverged resources and unfinished teardowns
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Deadline of a single device operation
    #[serde(default = "default_device_timeout")]
    pub device_timeout_secs: u64,
}

/// Device write retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

/// Status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Directory receiving `<namespace>/<name>.json`
    #[serde(default = "default_status_dir")]
    pub dir: String,
}

/// One managed router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    pub name: String,

    /// Host name or IP; defaults to `name`
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Complete slicemgrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceMgrConfig {
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfigEntry>,

    /// Credentials per router name
    #[serde(default)]
    pub credentials: BTreeMap<String, Credentials>,
}

const SIMULATED_USERNAME: &str = "admin";
const SIMULATED_PASSWORD: &str = "admin";

fn default_fanout() -> usize {
    4
}

fn default_drift_interval() -> u64 {
    300
}

fn default_resync_interval() -> u64 {
    60
}

fn default_device_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5000
}

fn default_status_dir() -> String {
    "/var/lib/nslice/status".to_string()
}

fn default_port() -> u16 {
    DEFAULT_GNMI_PORT
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            fanout: default_fanout(),
            drift_interval_secs: default_drift_interval(),
            resync_interval_secs: default_resync_interval(),
            device_timeout_secs: default_device_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            dir: default_status_dir(),
        }
    }
}

impl SliceMgrConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(SliceMgrError::io(path, e)),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SliceMgrError::invalid_config("file", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile.fanout == 0 {
            return Err(SliceMgrError::invalid_config("reconcile.fanout", "must be > 0"));
        }
        if self.reconcile.drift_interval_secs == 0 {
            return Err(SliceMgrError::invalid_config(
                "reconcile.drift_interval_secs",
                "must be > 0",
            ));
        }
        if self.reconcile.resync_interval_secs == 0 {
            return Err(SliceMgrError::invalid_config(
                "reconcile.resync_interval_secs",
                "must be > 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SliceMgrError::invalid_config("retry.max_attempts", "must be > 0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(SliceMgrError::invalid_config(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(SliceMgrError::invalid_config("devices.name", "must not be empty"));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(SliceMgrError::invalid_config(
                    "devices.name",
                    format!("duplicate device {}", device.name),
                ));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_backoff(
                Duration::from_millis(self.retry.initial_backoff_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
            )
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile.device_timeout_secs)
    }

    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            drift_interval: Duration::from_secs(self.reconcile.drift_interval_secs),
            resync_interval: Duration::from_secs(self.reconcile.resync_interval_secs),
        }
    }

    pub fn inventory(&self) -> Vec<DeviceRef> {
        self.devices
            .iter()
            .map(|d| DeviceRef {
                name: d.name.clone(),
                address: d.address.clone().unwrap_or_else(|| d.name.clone()),
                port: d.port,
            })
            .collect()
    }

    /// Credential table for the simulated fabric. With no `[credentials.*]`
    /// configured every router falls back to the simulator's default login
    /// instead of failing each service with a credentials error.
    pub fn simulation_credentials(&self) -> StaticCredentials {
        let table = self.credential_table();
        if !self.credentials.is_empty() {
            return table;
        }
        warn!("no [credentials.*] configured, simulated routers use the default login");
        table.with_fallback(Credentials::new(SIMULATED_USERNAME, SIMULATED_PASSWORD))
    }

    pub fn credential_table(&self) -> StaticCredentials {
        self.credentials
            .iter()
            .fold(StaticCredentials::new(), |table, (router, creds)| {
                table.with_router(router.clone(), creds.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CredentialResolver;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SliceMgrConfig::default();
        assert_eq!(config.reconcile.fanout, 4);
        assert_eq!(config.reconcile.drift_interval_secs, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.device_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = SliceMgrConfig::from_toml_str(
            r#"
            [reconcile]
            fanout = 8

            [[devices]]
            name = "SR1"
            address = "192.0.2.1"

            [[devices]]
            name = "SR2"

            [credentials.SR1]
            username = "admin"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.reconcile.fanout, 8);
        assert_eq!(config.reconcile.resync_interval_secs, 60);
        let inventory = config.inventory();
        assert_eq!(inventory[0].address, "192.0.2.1");
        assert_eq!(inventory[1].address, "SR2");
        assert_eq!(inventory[1].port, 57400);
        assert_eq!(config.daemon_config().drift_interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_credential_table() {
        let config = SliceMgrConfig::from_toml_str(
            "[credentials.SR1]\nusername = \"admin\"\npassword = \"secret\"\n",
        )
        .unwrap();
        let table = config.credential_table();
        assert_eq!(table.resolve("SR1").await.unwrap().password, "secret");
        assert!(table.resolve("SR2").await.is_err());
        // an explicit table gets no fallback
        assert!(config.simulation_credentials().resolve("SR2").await.is_err());
    }

    #[tokio::test]
    async fn test_simulation_credentials_fall_back_when_unset() {
        let config = SliceMgrConfig::default();
        assert!(config.credential_table().resolve("SR1").await.is_err());
        let creds = config.simulation_credentials().resolve("SR1").await.unwrap();
        assert_eq!(creds.username, "admin");
    }

    #[test]
    fn test_validation() {
        assert!(SliceMgrConfig::from_toml_str("[reconcile]\nfanout = 0\n").is_err());
        assert!(SliceMgrConfig::from_toml_str("[retry]\nmax_attempts = 0\n").is_err());
        assert!(SliceMgrConfig::from_toml_str(
            "[retry]\ninitial_backoff_ms = 9000\nmax_backoff_ms = 100\n"
        )
        .is_err());
        assert!(SliceMgrConfig::from_toml_str(
            "[[devices]]\nname = \"SR1\"\n[[devices]]\nname = \"SR1\"\n"
        )
        .is_err());
        assert!(SliceMgrConfig::from_toml_str("reconcile = 3").is_err());
    }

    #[test]
    fn test_load_or_default() {
        let missing = SliceMgrConfig::load_or_default("/nonexistent/slicemgrd.toml").unwrap();
        assert_eq!(missing.reconcile.fanout, 4);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[status]\ndir = \"/tmp/status\"").unwrap();
        let loaded = SliceMgrConfig::load_or_default(file.path()).unwrap();
        assert_eq!(loaded.status.dir, "/tmp/status");
    }
}
