//! Cross-service ownership of device resources.
//!
//! Two services must not share a service name, service id, SAP or SDP on
//! the same router. Conflicts are rejected as invalid specs before any
//! device is touched.

use crate::compiler::{CompileError, DeviceClaim};
use crate::types::ResourceKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Claims {
    owners: BTreeMap<DeviceClaim, ResourceKey>,
    by_resource: HashMap<ResourceKey, Vec<DeviceClaim>>,
}

/// Registry of claimed device resources.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    inner: Mutex<Claims>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `key`'s claims with `claims`, or leaves them untouched and
    /// fails if another resource already holds one of them.
    pub fn claim(&self, key: &ResourceKey, claims: Vec<DeviceClaim>) -> Result<(), CompileError> {
        let mut inner = self.inner.lock();
        for claim in &claims {
            if let Some(owner) = inner.owners.get(claim) {
                if owner != key {
                    return Err(CompileError::invalid_spec(format!(
                        "{} on {} is already used by {}",
                        claim.claim, claim.router, owner
                    )));
                }
            }
        }

        if let Some(old) = inner.by_resource.remove(key) {
            for claim in old {
                inner.owners.remove(&claim);
            }
        }
        for claim in &claims {
            inner.owners.insert(claim.clone(), key.clone());
        }
        inner.by_resource.insert(key.clone(), claims);
        Ok(())
    }

    /// Releases everything `key` holds.
    pub fn release(&self, key: &ResourceKey) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.by_resource.remove(key) {
            for claim in old {
                inner.owners.remove(&claim);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
