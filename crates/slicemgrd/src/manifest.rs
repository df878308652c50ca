//! Service manifests read from a directory of JSON files.

use crate::error::{Result, SliceMgrError};
use crate::types::ServiceManifest;
use std::path::Path;
use tracing::debug;

/// Reads every `*.json` file in `dir`, sorted by file name.
pub fn load_manifests(dir: impl AsRef<Path>) -> Result<Vec<ServiceManifest>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| SliceMgrError::io(dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| SliceMgrError::io(dir, e))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(&path).map_err(|e| SliceMgrError::io(&path, e))?;
        let manifest: ServiceManifest =
            serde_json::from_slice(&bytes).map_err(|e| SliceMgrError::manifest(&path, e.to_string()))?;
        debug!(path = %path.display(), key = %manifest.key(), "loaded manifest");
        manifests.push(manifest);
    }
    Ok(manifests)
}
