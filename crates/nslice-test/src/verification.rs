//! Verification helpers for device and status state

use crate::fabric::TestFabric;
use nslice_mgrd::{ConfigPath, ConfigValue, EndpointState, Phase, ResourceKey};
use std::collections::BTreeMap;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected path '{path}' not found on {router}")]
    PathNotFound { router: String, path: String },

    #[error("Path '{path}' unexpectedly present on {router}")]
    UnexpectedPath { router: String, path: String },

    #[error("Value mismatch for {router} {path}: expected {expected:?}, got {actual:?}")]
    ValueMismatch {
        router: String,
        path: String,
        expected: ConfigValue,
        actual: ConfigValue,
    },

    #[error("Phase mismatch for {key}: expected {expected:?}, got {actual:?}")]
    PhaseMismatch {
        key: String,
        expected: Phase,
        actual: Option<Phase>,
    },

    #[error("Endpoint state mismatch for {endpoint}: expected {expected:?}, got {actual:?}")]
    EndpointMismatch {
        endpoint: String,
        expected: EndpointState,
        actual: Option<EndpointState>,
    },

    #[error("Config of {router} changed outside the service")]
    ForeignConfigChanged { router: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Device config verification helper
pub struct DeviceVerifier<'a> {
    fabric: &'a TestFabric,
}

impl<'a> DeviceVerifier<'a> {
    pub fn new(fabric: &'a TestFabric) -> Self {
        Self { fabric }
    }

    pub fn assert_value(&self, router: &str, path: &ConfigPath, expected: &ConfigValue) -> VerifyResult<()> {
        match self.fabric.gateway.value_at(router, path) {
            None => Err(VerificationError::PathNotFound {
                router: router.to_string(),
                path: path.to_string(),
            }),
            Some(actual) if &actual != expected => Err(VerificationError::ValueMismatch {
                router: router.to_string(),
                path: path.to_string(),
                expected: expected.clone(),
                actual,
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn assert_present(&self, router: &str, path: &ConfigPath) -> VerifyResult<()> {
        if self.fabric.gateway.value_at(router, path).is_none() {
            return Err(VerificationError::PathNotFound {
                router: router.to_string(),
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Verifies that nothing at or under `root` exists on `router`.
    pub fn assert_absent(&self, router: &str, root: &ConfigPath) -> VerifyResult<()> {
        let config = self.fabric.gateway.config_of(router);
        if let Some(path) = config.keys().find(|p| p.is_within(root)) {
            return Err(VerificationError::UnexpectedPath {
                router: router.to_string(),
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Verifies that every path outside `root` still matches `before`.
    pub fn assert_untouched_outside(
        &self,
        router: &str,
        root: &ConfigPath,
        before: &BTreeMap<ConfigPath, ConfigValue>,
    ) -> VerifyResult<()> {
        let outside = |config: &BTreeMap<ConfigPath, ConfigValue>| -> BTreeMap<ConfigPath, ConfigValue> {
            config
                .iter()
                .filter(|(p, _)| !p.is_within(root))
                .map(|(p, v)| (p.clone(), v.clone()))
                .collect()
        };
        if outside(&self.fabric.gateway.config_of(router)) != outside(before) {
            return Err(VerificationError::ForeignConfigChanged {
                router: router.to_string(),
            });
        }
        Ok(())
    }
}

/// Record and status verification helper
pub struct StatusVerifier<'a> {
    fabric: &'a TestFabric,
}

impl<'a> StatusVerifier<'a> {
    pub fn new(fabric: &'a TestFabric) -> Self {
        Self { fabric }
    }

    /// Checks both the record and the last published document.
    pub fn assert_phase(&self, key: &ResourceKey, expected: Phase) -> VerifyResult<()> {
        let actual = self.fabric.phase(key);
        let published = self.fabric.status(key).map(|doc| doc.phase);
        if actual != Some(expected) || published != Some(expected) {
            return Err(VerificationError::PhaseMismatch {
                key: key.to_string(),
                expected,
                actual: actual.or(published),
            });
        }
        Ok(())
    }

    /// Checks every endpoint of `key` on `router`.
    pub fn assert_router_state(&self, key: &ResourceKey, router: &str, expected: EndpointState) -> VerifyResult<()> {
        let record = self.fabric.record(key);
        let endpoints = record.map(|r| r.endpoints_on(router)).unwrap_or_default();
        for endpoint in endpoints {
            let actual = record.and_then(|r| r.endpoints.get(&endpoint)).map(|s| s.state);
            if actual != Some(expected) {
                return Err(VerificationError::EndpointMismatch {
                    endpoint: endpoint.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
