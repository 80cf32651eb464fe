//! Core plugin types.

use std::collections::BTreeSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of capability a plugin registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    /// A platform: one config block drives many accessories.
    Platform,
    /// A single accessory.
    Accessory,
}

impl CapabilityType {
    /// Name used in schemas and config documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Accessory => "accessory",
        }
    }

    /// Parse a `pluginType` value. Anything but `accessory` is a platform.
    pub fn from_plugin_type(value: Option<&str>) -> Self {
        match value {
            Some("accessory") => Self::Accessory,
            _ => Self::Platform,
        }
    }
}

impl std::fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability a plugin offers, registered under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Identifier the capability is referenced by in configuration.
    pub alias: String,
    /// Platform or accessory.
    #[serde(rename = "type")]
    pub capability_type: CapabilityType,
    /// Full package name of the plugin offering it.
    pub source_plugin_name: String,
}

impl CapabilityRecord {
    /// Create a new record.
    pub fn new(
        alias: impl Into<String>,
        capability_type: CapabilityType,
        source_plugin_name: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            capability_type,
            source_plugin_name: source_plugin_name.into(),
        }
    }
}

/// Platform half of a plugin's configuration schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformSchema {
    /// Alias the schema applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_alias: Option<String>,
    /// JSON schema body.
    #[serde(default)]
    pub schema: Value,
}

/// Accessory half of a plugin's configuration schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessorySchema {
    /// Alias the schemas apply to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_alias: Option<String>,
    /// JSON schema bodies, one per accessory kind.
    #[serde(default)]
    pub schemas: Vec<Value>,
}

/// A plugin's capability schema. Both halves may be populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub platform: PlatformSchema,
    pub accessories: AccessorySchema,
}

/// Normalized description of an installed, recognized plugin.
///
/// Re-derived from disk on every discovery call; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Short name (without scope).
    pub name: String,
    /// Scope without the `@`, for scoped packages.
    pub scope: Option<String>,
    /// Installed version.
    pub version: String,
    /// Install directory.
    pub directory: PathBuf,
    /// Description with URLs removed.
    pub description: String,
    /// Package keywords.
    pub keywords: BTreeSet<String>,
    /// Capability schema.
    pub schema: CapabilitySchema,
}

impl PluginDescriptor {
    /// Full package name (`@scope/name` or `name`).
    pub fn full_name(&self) -> String {
        full_name(self.scope.as_deref(), &self.name)
    }
}

/// Keywords that mark a package as a bridge plugin.
pub const RECOGNIZED_KEYWORDS: &[&str] = &["hoobs-plugin", "homebridge-plugin", "hoobs-interface"];

/// Keywords that get a package registered in the config document's plugin list.
pub const REGISTERED_KEYWORDS: &[&str] = &["hoobs-plugin", "homebridge-plugin"];

/// Package manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// Dedicated platform schema file name.
pub const PLATFORM_SCHEMA_FILE: &str = "platform.schema.json";

/// Dedicated accessories schema file name.
pub const ACCESSORIES_SCHEMA_FILE: &str = "accessories.schema.json";

/// Generic config schema file name.
pub const CONFIG_SCHEMA_FILE: &str = "config.schema.json";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:https?|ftp)://\S+").unwrap());

/// Remove URLs from a package description and trim it.
pub fn clean_description(description: &str) -> String {
    URL_PATTERN.replace_all(description, "").trim().to_string()
}

/// Split `@scope/name` into `(Some("scope"), "name")`.
pub fn split_package_name(full: &str) -> (Option<String>, String) {
    let parts: Vec<&str> = full.split('/').collect();

    if parts.len() == 2 {
        (Some(parts[0].replace('@', "")), parts[1].to_string())
    } else {
        (None, full.to_string())
    }
}

/// Last `/` segment of a package id.
pub fn short_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Join a scope and a short name into a package name.
pub fn full_name(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) if !scope.is_empty() => format!("@{scope}/{name}"),
        _ => name.to_string(),
    }
}
