//! The host's persisted configuration document.
//!
//! Only the plugin list and the platform/accessory blocks are modelled; every
//! other key (bridge settings, ports, per-block options) is carried through
//! untouched so a load/save cycle never drops user configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::manifest::{load_json, save_json};
use super::PluginResult;

/// Link from a config block back to the installed plugin that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMap {
    #[serde(default)]
    pub plugin_name: String,
}

impl PluginMap {
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self { plugin_name: plugin_name.into() }
    }
}

/// A `platforms` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformEntry {
    #[serde(default)]
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_map: Option<PluginMap>,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// An `accessories` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessoryEntry {
    #[serde(default)]
    pub accessory: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_map: Option<PluginMap>,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Which installed plugin a block is linked to, if any.
pub trait LinkedEntry {
    fn linked_plugin(&self) -> Option<&str>;

    fn is_linked_to(&self, name: &str) -> bool {
        self.linked_plugin() == Some(name)
    }
}

impl LinkedEntry for PlatformEntry {
    fn linked_plugin(&self) -> Option<&str> {
        self.plugin_map.as_ref().map(|m| m.plugin_name.as_str())
    }
}

impl LinkedEntry for AccessoryEntry {
    fn linked_plugin(&self) -> Option<&str> {
        self.plugin_map.as_ref().map(|m| m.plugin_name.as_str())
    }
}

/// The config document read by the host at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Short names of enabled plugins.
    #[serde(default)]
    pub plugins: Vec<String>,

    #[serde(default)]
    pub platforms: Vec<PlatformEntry>,

    #[serde(default)]
    pub accessories: Vec<AccessoryEntry>,

    /// Unrelated host settings.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ConfigDocument {
    /// Load the document, or an empty one when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        load_json(path)
    }

    /// Persist the document.
    pub fn save(&self, path: &Path) -> PluginResult<()> {
        save_json(path, self)
    }
}
