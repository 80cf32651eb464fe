//! Plugin type detection.
//!
//! Decides which capabilities (platforms and/or accessories, by alias) a
//! plugin offers. Schema files are authoritative when present; otherwise the
//! plugin's entry module is probed dynamically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::manifest::{read_json, schema_alias, PackageManifest};
use super::probe::CapabilityProbe;
use super::types::{
    CapabilityRecord, CapabilityType, ACCESSORIES_SCHEMA_FILE, CONFIG_SCHEMA_FILE,
    PLATFORM_SCHEMA_FILE,
};

/// Classifies installed plugins, memoizing results per resolver.
pub struct CapabilityResolver {
    modules_dir: PathBuf,
    probe: Arc<dyn CapabilityProbe>,
    memo: Mutex<HashMap<String, Vec<CapabilityRecord>>>,
}

impl std::fmt::Debug for CapabilityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityResolver")
            .field("modules_dir", &self.modules_dir)
            .field("memoized", &self.memo.lock().len())
            .finish()
    }
}

impl CapabilityResolver {
    /// Create a resolver for plugins installed under `modules_dir`.
    pub fn new(modules_dir: impl Into<PathBuf>, probe: Arc<dyn CapabilityProbe>) -> Self {
        Self { modules_dir: modules_dir.into(), probe, memo: Mutex::new(HashMap::new()) }
    }

    /// Directory plugins are resolved in.
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// The capabilities `name` offers, in discovery order.
    ///
    /// An empty list means the type is unknown; callers treat that as a soft
    /// failure. Only non-empty results are memoized, so a plugin that could
    /// not be classified is retried on the next call.
    pub async fn get_plugin_type(&self, name: &str) -> Vec<CapabilityRecord> {
        tracing::debug!(plugin = name, "Resolving plugin type");

        if let Some(cached) = self.memo.lock().get(name) {
            tracing::debug!(plugin = name, "Plugin type served from cache");
            return cached.clone();
        }

        let directory = self.modules_dir.join(name);

        let records = match from_schema_files(name, &directory) {
            Some(records) => records,
            None => self.probe_entry(name, &directory).await,
        };

        if !records.is_empty() {
            self.memo.lock().insert(name.to_string(), records.clone());
        }

        records
    }

    /// Drop the memoized result for `name`, e.g. after it was updated or removed.
    pub fn forget(&self, name: &str) {
        self.memo.lock().remove(name);
    }

    async fn probe_entry(&self, name: &str, directory: &Path) -> Vec<CapabilityRecord> {
        let entry = entry_path(directory);
        tracing::debug!(plugin = name, entry = %entry.display(), "Probing plugin loadout");

        match self.probe.probe(name, &entry).await {
            Ok(records) => records,
            Err(e) => {
                tracing::info!(plugin = name, error = %e, "Unable to determine plugin type");
                Vec::new()
            }
        }
    }
}

/// Derive a single capability from the first schema file present.
fn from_schema_files(name: &str, directory: &Path) -> Option<Vec<CapabilityRecord>> {
    let record = |schema: &Value, capability_type: CapabilityType| {
        let alias = schema_alias(schema).unwrap_or_else(|| name.to_string());
        vec![CapabilityRecord::new(alias, capability_type, name)]
    };

    let platform = directory.join(PLATFORM_SCHEMA_FILE);
    if platform.is_file() {
        let schema: Value = read_json(&platform).unwrap_or_default();
        return Some(record(&schema, CapabilityType::Platform));
    }

    let accessories = directory.join(ACCESSORIES_SCHEMA_FILE);
    if accessories.is_file() {
        let schema: Value = read_json(&accessories).unwrap_or_default();
        return Some(record(&schema, CapabilityType::Accessory));
    }

    let config = directory.join(CONFIG_SCHEMA_FILE);
    if config.is_file() {
        let schema: Value = read_json(&config).unwrap_or_default();
        let capability_type =
            CapabilityType::from_plugin_type(schema.get("pluginType").and_then(Value::as_str));
        return Some(record(&schema, capability_type));
    }

    None
}

/// The module to load for a plugin: its `main` file, or the package directory.
pub fn entry_path(directory: &Path) -> PathBuf {
    match PackageManifest::from_dir(directory).and_then(|m| m.main) {
        Some(main) if !main.trim().is_empty() => directory.join(main),
        _ => directory.to_path_buf(),
    }
}
