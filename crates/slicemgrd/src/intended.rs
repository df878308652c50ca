//! Canonical configuration tree produced by the compiler.
//!
//! Paths are gNMI-style strings such as
//! `/configure/service/vpls[service-name=blue]/sap[sap-id=1/1/c1/1:701]`.
//! Key values may themselves contain `/`, so path manipulation is done on
//! bracket-aware elements rather than on raw string splits.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A configuration path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPath(String);

impl ConfigPath {
    /// Creates a path from its string form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a plain element.
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name))
    }

    /// Appends a keyed list element: `name[key=value]`.
    pub fn keyed(&self, name: &str, key: &str, value: impl fmt::Display) -> Self {
        Self(format!("{}/{}[{}={}]", self.0, name, key, value))
    }

    /// Splits the path into elements, ignoring `/` inside `[...]`.
    pub fn elements(&self) -> Vec<&str> {
        let mut elements = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (i, c) in self.0.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => {
                    if i > start {
                        elements.push(&self.0[start..i]);
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        if start < self.0.len() {
            elements.push(&self.0[start..]);
        }
        elements
    }

    /// Number of elements in the path.
    pub fn depth(&self) -> usize {
        self.elements().len()
    }

    /// Name of the last element without its keys (`sap`, `admin-state`).
    pub fn leaf_name(&self) -> &str {
        let last = self.elements().last().copied().unwrap_or("");
        last.split('[').next().unwrap_or(last)
    }

    /// True if the last element is a keyed list entry.
    pub fn is_list_entry(&self) -> bool {
        self.elements().last().is_some_and(|e| e.ends_with(']'))
    }

    /// Returns the parent path, or `None` for a single-element path.
    pub fn parent(&self) -> Option<ConfigPath> {
        let elements = self.elements();
        if elements.len() < 2 {
            return None;
        }
        Some(ConfigPath(format!(
            "/{}",
            elements[..elements.len() - 1].join("/")
        )))
    }

    /// Every proper ancestor, nearest first.
    pub fn ancestors(&self) -> Vec<ConfigPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out
    }

    /// True if `self` lies strictly below `other`.
    pub fn is_descendant_of(&self, other: &ConfigPath) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(&other.0)
            && self.0.as_bytes()[other.0.len()] == b'/'
    }

    /// True if `self` equals `other` or lies below it.
    pub fn is_within(&self, other: &ConfigPath) -> bool {
        self == other || self.is_descendant_of(other)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Value of a configuration node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    /// A container or list entry that must exist.
    Present,
    /// A string leaf.
    Text(String),
    /// An unsigned integer leaf.
    Number(u64),
    /// A boolean leaf.
    Bool(bool),
}

impl ConfigValue {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        ConfigValue::Text(s.into())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Present => f.write_str("<present>"),
            ConfigValue::Text(s) => write!(f, "{:?}", s),
            ConfigValue::Number(n) => write!(f, "{}", n),
            ConfigValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One path/value update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub path: ConfigPath,
    pub value: ConfigValue,
}

impl ConfigEntry {
    pub fn new(path: ConfigPath, value: ConfigValue) -> Self {
        Self { path, value }
    }
}

/// Ordered configuration for one device.
///
/// Entry order is creation order: containers precede their children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceConfig {
    entries: Vec<ConfigEntry>,
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, replacing the value if the path already exists.
    pub fn push(&mut self, path: ConfigPath, value: ConfigValue) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.path == path) {
            existing.value = value;
        } else {
            self.entries.push(ConfigEntry::new(path, value));
        }
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &ConfigPath) -> Option<&ConfigValue> {
        self.entries.iter().find(|e| &e.path == path).map(|e| &e.value)
    }

    pub fn contains(&self, path: &ConfigPath) -> bool {
        self.get(path).is_some()
    }

    /// All paths in creation order.
    pub fn paths(&self) -> Vec<ConfigPath> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Entries whose path is in `paths`, in creation order.
    pub fn select(&self, paths: &[ConfigPath]) -> Vec<ConfigEntry> {
        let wanted: BTreeSet<&ConfigPath> = paths.iter().collect();
        self.entries
            .iter()
            .filter(|e| wanted.contains(&e.path))
            .cloned()
            .collect()
    }

    /// Union of two configs: `self` order first, then entries only in `other`.
    pub fn merged(&self, other: &DeviceConfig) -> DeviceConfig {
        let mut out = self.clone();
        for entry in &other.entries {
            if !out.contains(&entry.path) {
                out.entries.push(entry.clone());
            }
        }
        out
    }
}

/// Intended configuration of a whole service, one subtree per device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntendedConfig {
    devices: BTreeMap<String, DeviceConfig>,
}

impl IntendedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable access to a device's config, creating it if needed.
    pub fn device_mut(&mut self, router: &str) -> &mut DeviceConfig {
        self.devices.entry(router.to_string()).or_default()
    }

    pub fn device(&self, router: &str) -> Option<&DeviceConfig> {
        self.devices.get(router)
    }

    pub fn routers(&self) -> impl Iterator<Item = &String> {
        self.devices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceConfig)> {
        self.devices.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Operations to send to one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOps {
    pub router: String,
    /// Path/value writes in creation order.
    pub updates: Vec<ConfigEntry>,
    /// Paths to remove, children first.
    pub deletes: Vec<ConfigPath>,
}

impl DeviceOps {
    pub fn new(router: impl Into<String>) -> Self {
        Self {
            router: router.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    /// True if the ops only remove configuration.
    pub fn is_delete_only(&self) -> bool {
        self.updates.is_empty() && !self.deletes.is_empty()
    }

    /// Every path the ops touch.
    pub fn touched_paths(&self) -> Vec<ConfigPath> {
        self.deletes
            .iter()
            .cloned()
            .chain(self.updates.iter().map(|e| e.path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sap_path() -> ConfigPath {
        ConfigPath::new("/configure/service")
            .keyed("vpls", "service-name", "blue")
            .keyed("sap", "sap-id", "1/1/c1/1:701")
    }

    #[test]
    fn test_elements_ignore_slash_in_keys() {
        let path = sap_path().child("admin-state");
        assert_eq!(
            path.elements(),
            vec![
                "configure",
                "service",
                "vpls[service-name=blue]",
                "sap[sap-id=1/1/c1/1:701]",
                "admin-state"
            ]
        );
        assert_eq!(path.depth(), 5);
        assert_eq!(path.leaf_name(), "admin-state");
        assert!(!path.is_list_entry());
        assert!(sap_path().is_list_entry());
        assert_eq!(sap_path().leaf_name(), "sap");
    }

    #[test]
    fn test_parent_and_ancestors() {
        let leaf = sap_path().child("admin-state");
        assert_eq!(leaf.parent(), Some(sap_path()));
        let ancestors = leaf.ancestors();
        assert_eq!(ancestors.len(), 4);
        assert_eq!(ancestors[3], ConfigPath::new("/configure"));
        assert_eq!(ConfigPath::new("/configure").parent(), None);
    }

    #[test]
    fn test_descendant() {
        let root = ConfigPath::new("/configure/service").keyed("vpls", "service-name", "blue");
        let sibling = ConfigPath::new("/configure/service").keyed("vpls", "service-name", "blue2");
        assert!(sap_path().is_descendant_of(&root));
        assert!(!sibling.is_descendant_of(&root));
        assert!(root.is_within(&root));
        assert!(!root.is_descendant_of(&root));
    }

    #[test]
    fn test_device_config_push_replaces() {
        let mut config = DeviceConfig::new();
        config.push(sap_path(), ConfigValue::Present);
        config.push(sap_path().child("admin-state"), ConfigValue::text("enable"));
        config.push(sap_path().child("admin-state"), ConfigValue::text("disable"));
        assert_eq!(config.len(), 2);
        assert_eq!(
            config.get(&sap_path().child("admin-state")),
            Some(&ConfigValue::text("disable"))
        );
    }

    #[test]
    fn test_select_keeps_creation_order() {
        let mut config = DeviceConfig::new();
        config.push(sap_path(), ConfigValue::Present);
        config.push(sap_path().child("admin-state"), ConfigValue::text("enable"));
        let selected = config.select(&[sap_path().child("admin-state"), sap_path()]);
        assert_eq!(selected[0].path, sap_path());
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_config_value_json_shape() {
        let json = serde_json::to_string(&ConfigValue::Number(7001)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":7001}"#);
        let present = serde_json::to_string(&ConfigValue::Present).unwrap();
        assert_eq!(present, r#"{"type":"present"}"#);
    }
}
