//! Package manifest and schema file parsing.
//!
//! Every installed plugin is an npm package: a `package.json` plus optional
//! schema files next to it. Missing or unreadable files are never fatal here;
//! they read as "absent" and callers skip them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use super::types::{
    AccessorySchema, CapabilitySchema, PlatformSchema, ACCESSORIES_SCHEMA_FILE,
    CONFIG_SCHEMA_FILE, MANIFEST_FILE, PLATFORM_SCHEMA_FILE, RECOGNIZED_KEYWORDS,
    REGISTERED_KEYWORDS,
};
use super::PluginResult;

/// Read a JSON file, falling back to `T::default()` when it is missing or unreadable.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    read_json(path).unwrap_or_default()
}

/// Read a JSON file if it exists and parses.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable JSON file");
            None
        }
    }
}

/// Write pretty-printed JSON, creating parent directories.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> PluginResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;

    Ok(())
}

/// Accept a keyword array, ignoring non-string members and non-array values.
fn lenient_keywords<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;

    Ok(match value {
        Value::Array(items) => {
            items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        _ => Vec::new(),
    })
}

/// Accept a string, treating anything else as empty.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

/// The parts of `package.json` the engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,

    #[serde(default, deserialize_with = "lenient_keywords")]
    pub keywords: Vec<String>,

    /// Entry module, relative to the package directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Read `<directory>/package.json`, or `None` when it is absent.
    pub fn from_dir(directory: &Path) -> Option<Self> {
        read_json(&directory.join(MANIFEST_FILE))
    }

    /// Whether the manifest exists on disk.
    pub fn exists_in(directory: &Path) -> bool {
        directory.join(MANIFEST_FILE).is_file()
    }

    /// Whether the keywords mark this package as a bridge plugin.
    pub fn is_recognized(&self) -> bool {
        self.keywords.iter().any(|k| RECOGNIZED_KEYWORDS.contains(&k.as_str()))
    }

    /// Whether the keywords ask for the plugin to be listed in the config document.
    pub fn is_registered_plugin(&self) -> bool {
        self.keywords.iter().any(|k| REGISTERED_KEYWORDS.contains(&k.as_str()))
    }

    /// Names of the resolved dependencies.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.keys().cloned().collect()
    }
}

/// `plugin_alias`, falling back to `pluginAlias`.
pub fn schema_alias(value: &Value) -> Option<String> {
    value
        .get("plugin_alias")
        .or_else(|| value.get("pluginAlias"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn platform_from(value: &Value) -> PlatformSchema {
    PlatformSchema {
        plugin_alias: schema_alias(value),
        schema: value.get("schema").cloned().unwrap_or_else(empty_object),
    }
}

fn accessories_from(value: &Value) -> AccessorySchema {
    AccessorySchema {
        plugin_alias: schema_alias(value),
        schemas: value.get("schemas").and_then(Value::as_array).cloned().unwrap_or_default(),
    }
}

/// Normalize a generic `config.schema.json` into the platform/accessory shape.
///
/// A flat `schema` body (no `properties` key) is wrapped in an object schema.
fn from_config_schema(data: &Value, schema: &mut CapabilitySchema) {
    match data.get("pluginType").and_then(Value::as_str) {
        Some("platform") => {
            let body = data.get("schema");

            schema.platform = match body {
                Some(body) if body.get("properties").is_none() => PlatformSchema {
                    plugin_alias: schema_alias(data),
                    schema: json!({ "type": "object", "properties": body.clone() }),
                },
                _ => platform_from(data),
            };
        }
        Some("accessory") => {
            schema.accessories = AccessorySchema {
                plugin_alias: schema_alias(data),
                schemas: data.get("schema").cloned().into_iter().collect(),
            };
        }
        _ => {}
    }
}

impl CapabilitySchema {
    /// Derive a plugin's capability schema from the files in its directory.
    ///
    /// Tried in order: `platform.schema.json`, then `config.schema.json`; an
    /// `accessories.schema.json` then supplements (or overrides) the accessory half.
    pub fn read(directory: &Path) -> Self {
        let mut schema = Self::default();

        if let Some(platform) = read_json::<Value>(&directory.join(PLATFORM_SCHEMA_FILE)) {
            schema.platform = platform_from(&platform);
        } else if let Some(config) = read_json::<Value>(&directory.join(CONFIG_SCHEMA_FILE)) {
            from_config_schema(&config, &mut schema);
        }

        if let Some(accessories) = read_json::<Value>(&directory.join(ACCESSORIES_SCHEMA_FILE)) {
            schema.accessories = accessories_from(&accessories);
        }

        if schema.platform.schema.is_null() {
            schema.platform.schema = empty_object();
        }

        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, value: Value) {
        std::fs::write(dir.join(file), value.to_string()).unwrap();
    }

    #[test]
    fn test_manifest_parsing_is_lenient() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            MANIFEST_FILE,
            json!({"name": "acme", "version": "1.0.0", "keywords": "homebridge-plugin", "main": "dist/index.js"}),
        );

        let manifest = PackageManifest::from_dir(dir.path()).unwrap();
        assert_eq!(manifest.name, "acme");
        assert!(manifest.keywords.is_empty());
        assert_eq!(manifest.main.as_deref(), Some("dist/index.js"));
        assert!(!manifest.is_recognized());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(PackageManifest::from_dir(dir.path()).is_none());
        assert!(!PackageManifest::exists_in(dir.path()));
    }

    #[test]
    fn test_keyword_recognition() {
        let mut manifest = PackageManifest {
            keywords: vec!["hoobs-interface".into(), "lights".into()],
            ..Default::default()
        };
        assert!(manifest.is_recognized());
        assert!(!manifest.is_registered_plugin());

        manifest.keywords.push("homebridge-plugin".into());
        assert!(manifest.is_registered_plugin());
    }

    #[test]
    fn test_platform_schema_file() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            PLATFORM_SCHEMA_FILE,
            json!({"pluginAlias": "Ring", "schema": {"type": "object", "properties": {}}}),
        );

        let schema = CapabilitySchema::read(dir.path());
        assert_eq!(schema.platform.plugin_alias.as_deref(), Some("Ring"));
        assert_eq!(schema.platform.schema["type"], "object");
        assert!(schema.accessories.schemas.is_empty());
    }

    #[test]
    fn test_flat_config_schema_is_wrapped() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            CONFIG_SCHEMA_FILE,
            json!({"pluginAlias": "Nest", "pluginType": "platform", "schema": {"token": {"type": "string"}}}),
        );

        let schema = CapabilitySchema::read(dir.path());
        assert_eq!(schema.platform.plugin_alias.as_deref(), Some("Nest"));
        assert_eq!(schema.platform.schema["type"], "object");
        assert_eq!(schema.platform.schema["properties"]["token"]["type"], "string");
    }

    #[test]
    fn test_accessory_config_schema() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            CONFIG_SCHEMA_FILE,
            json!({"pluginAlias": "Fan", "pluginType": "accessory", "schema": {"type": "object"}}),
        );

        let schema = CapabilitySchema::read(dir.path());
        assert_eq!(schema.accessories.plugin_alias.as_deref(), Some("Fan"));
        assert_eq!(schema.accessories.schemas.len(), 1);
        assert_eq!(schema.platform.schema, json!({}));
    }

    #[test]
    fn test_both_halves_populated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), PLATFORM_SCHEMA_FILE, json!({"plugin_alias": "Hub"}));
        write(
            dir.path(),
            ACCESSORIES_SCHEMA_FILE,
            json!({"plugin_alias": "Switch", "schemas": [{"type": "object"}]}),
        );

        let schema = CapabilitySchema::read(dir.path());
        assert_eq!(schema.platform.plugin_alias.as_deref(), Some("Hub"));
        assert_eq!(schema.accessories.plugin_alias.as_deref(), Some("Switch"));
        assert_eq!(schema.accessories.schemas.len(), 1);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.json");

        save_json(&path, &json!({"a": 1})).unwrap();
        let value: Value = load_json(&path);
        assert_eq!(value["a"], 1);

        let missing: Value = load_json(&dir.path().join("missing.json"));
        assert!(missing.is_null());
    }
}
