//! The bridge side of a loaded plugin.
//!
//! When the bridge starts it loads each plugin's entry module and hands it an
//! API object; the plugin registers its accessories and platforms back through
//! that object. [`BridgePlugin`] keeps those registrations for one plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::manifest::PackageManifest;
use super::probe::EntryExport;
use super::types::CapabilityType;
use super::PluginResult;

/// Entry used when a manifest names no `main`.
const DEFAULT_MAIN: &str = "./index.js";

/// A plugin's initializer, called with the bridge API.
pub type InitializerFn<A> = Box<dyn Fn(&mut A) + Send + Sync>;

/// What a loaded entry module exports.
pub enum ModuleExport<A> {
    /// The module itself is the initializer.
    Callable(InitializerFn<A>),
    /// The initializer sits under the `default` key.
    Default(InitializerFn<A>),
    /// No initializer.
    Missing,
}

impl<A> ModuleExport<A> {
    /// Shape of the export.
    pub fn kind(&self) -> EntryExport {
        match self {
            Self::Callable(_) => EntryExport::Callable,
            Self::Default(_) => EntryExport::Default,
            Self::Missing => EntryExport::Missing,
        }
    }

    fn initializer(&self) -> Option<&InitializerFn<A>> {
        match self {
            Self::Callable(f) | Self::Default(f) => Some(f),
            Self::Missing => None,
        }
    }
}

impl<A> std::fmt::Debug for ModuleExport<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModuleExport").field(&self.kind()).finish()
    }
}

/// Loads plugin entry modules.
pub trait ModuleLoader<A> {
    fn require(&self, entry: &Path) -> PluginResult<ModuleExport<A>>;
}

/// Last `.` segment of a registration identifier.
fn normalize(identifier: &str) -> &str {
    identifier.rsplit('.').next().unwrap_or(identifier)
}

/// A plugin as seen by the running bridge. `C` is the registered constructor.
#[derive(Debug)]
pub struct BridgePlugin<C> {
    path: PathBuf,
    name: String,
    main: String,
    version: String,
    identifiers: Vec<String>,
    accessories: HashMap<String, C>,
    platforms: HashMap<String, C>,
    dynamic: HashMap<String, Vec<C>>,
}

impl<C> BridgePlugin<C> {
    /// Create a plugin at `path` described by `manifest`.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, manifest: &PackageManifest) -> Self {
        let main = manifest
            .main
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MAIN.to_string());

        let version = if manifest.version.is_empty() {
            "0.0.0".to_string()
        } else {
            manifest.version.clone()
        };

        Self {
            path: path.into(),
            name: name.into(),
            main,
            version,
            identifiers: Vec::new(),
            accessories: HashMap::new(),
            platforms: HashMap::new(),
            dynamic: HashMap::new(),
        }
    }

    /// Create a plugin from the manifest in `path`.
    pub fn from_dir(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        let path = path.into();
        let manifest = PackageManifest::from_dir(&path).unwrap_or_default();
        Self::new(path, name, &manifest)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Entry module path.
    pub fn entry(&self) -> PathBuf {
        self.path.join(&self.main)
    }

    /// Normalized identifiers registered so far, in registration order.
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn has_identifier(&self, identifier: &str) -> bool {
        let identifier = normalize(identifier);
        self.identifiers.iter().any(|i| i == identifier)
    }

    fn add_identifier(&mut self, identifier: &str) -> bool {
        if self.has_identifier(identifier) {
            tracing::debug!(plugin = %self.name, identifier, "Ignoring duplicate registration");
            return false;
        }

        tracing::debug!(plugin = %self.name, identifier = normalize(identifier), "Registering");
        self.identifiers.push(normalize(identifier).to_string());
        true
    }

    /// Register an accessory constructor. Duplicates keep the first registration.
    pub fn register_accessory(&mut self, identifier: &str, constructor: C) {
        if self.add_identifier(identifier) {
            self.accessories.insert(normalize(identifier).to_string(), constructor);
        }
    }

    /// Register a platform constructor. Duplicates keep the first registration.
    pub fn register_platform(&mut self, identifier: &str, constructor: C) {
        if self.add_identifier(identifier) {
            self.platforms.insert(normalize(identifier).to_string(), constructor);
        }
    }

    /// Attach a running instance of a dynamic platform.
    pub fn assign_dynamic_platform(&mut self, identifier: &str, platform: C) {
        if !self.has_identifier(identifier) {
            self.add_identifier(identifier);
        }

        self.dynamic.entry(normalize(identifier).to_string()).or_default().push(platform);
    }

    /// The constructor registered for `identifier`.
    pub fn initializer(&self, kind: CapabilityType, identifier: &str) -> Option<&C> {
        let identifier = normalize(identifier);

        match kind {
            CapabilityType::Accessory => self.accessories.get(identifier),
            CapabilityType::Platform => self.platforms.get(identifier),
        }
    }

    /// The first dynamic platform attached under `identifier`.
    pub fn dynamic_platform(&self, identifier: &str) -> Option<&C> {
        self.dynamic.get(normalize(identifier)).and_then(|p| p.first())
    }

    /// Load the entry module and run its initializer against `api`.
    ///
    /// Failures are logged, never returned; the result says whether the
    /// initializer ran.
    pub fn load<A>(&self, loader: &dyn ModuleLoader<A>, api: &mut A) -> bool {
        if !self.path.exists() {
            tracing::error!(path = %self.path.display(), "Plugin was not found");
            return false;
        }

        let export = match loader.require(&self.entry()) {
            Ok(export) => export,
            Err(e) => {
                tracing::error!(plugin = %self.name, error = %e, "Unable to load plugin");
                return false;
            }
        };

        tracing::info!(plugin = %self.name, "Loaded plugin");

        match export.initializer() {
            Some(initializer) => {
                initializer(api);
                true
            }
            None => {
                tracing::error!(path = %self.path.display(), "Plugin does not export an initializer function");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginError;
    use tempfile::TempDir;

    /// API stand-in recording what plugins call.
    #[derive(Default)]
    struct Api {
        calls: Vec<&'static str>,
    }

    struct Loader(fn() -> PluginResult<ModuleExport<Api>>);

    impl ModuleLoader<Api> for Loader {
        fn require(&self, _entry: &Path) -> PluginResult<ModuleExport<Api>> {
            (self.0)()
        }
    }

    fn plugin(dir: &TempDir) -> BridgePlugin<u32> {
        std::fs::write(dir.path().join("package.json"), r#"{"version": "1.2.3", "main": "dist/index.js"}"#)
            .unwrap();
        BridgePlugin::from_dir(dir.path(), "acme-lights")
    }

    #[test]
    fn test_identifiers_are_normalized_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let mut plugin = plugin(&dir);

        plugin.register_platform("homebridge-acme.AcmeHub", 1);
        plugin.register_platform("AcmeHub", 2);
        plugin.register_accessory("acme.AcmeLight", 3);

        assert_eq!(plugin.identifiers(), ["AcmeHub", "AcmeLight"]);
        assert_eq!(plugin.initializer(CapabilityType::Platform, "x.AcmeHub"), Some(&1));
        assert_eq!(plugin.initializer(CapabilityType::Accessory, "AcmeLight"), Some(&3));
        assert_eq!(plugin.initializer(CapabilityType::Accessory, "AcmeHub"), None);
    }

    #[test]
    fn test_dynamic_platforms() {
        let dir = TempDir::new().unwrap();
        let mut plugin = plugin(&dir);

        plugin.assign_dynamic_platform("acme.AcmeHub", 7);
        plugin.assign_dynamic_platform("AcmeHub", 8);

        assert_eq!(plugin.dynamic_platform("AcmeHub"), Some(&7));
        assert_eq!(plugin.identifiers().len(), 1);
    }

    #[test]
    fn test_manifest_defaults() {
        let dir = TempDir::new().unwrap();
        let plugin: BridgePlugin<u32> = BridgePlugin::from_dir(dir.path(), "bare");

        assert_eq!(plugin.version(), "0.0.0");
        assert_eq!(plugin.entry(), dir.path().join("./index.js"));
    }

    #[test]
    fn test_load_runs_either_export_shape() {
        let dir = TempDir::new().unwrap();
        let plugin = plugin(&dir);

        let callable = Loader(|| Ok(ModuleExport::Callable(Box::new(|api: &mut Api| api.calls.push("callable")))));
        let default = Loader(|| Ok(ModuleExport::Default(Box::new(|api: &mut Api| api.calls.push("default")))));

        let mut api = Api::default();
        assert!(plugin.load(&callable, &mut api));
        assert!(plugin.load(&default, &mut api));
        assert_eq!(api.calls, vec!["callable", "default"]);
    }

    #[test]
    fn test_load_never_fails() {
        let dir = TempDir::new().unwrap();
        let plugin = plugin(&dir);
        let mut api = Api::default();

        assert!(!plugin.load(&Loader(|| Ok(ModuleExport::Missing)), &mut api));
        assert!(!plugin.load(&Loader(|| Err(PluginError::InvalidManifest("syntax".into()))), &mut api));

        let missing: BridgePlugin<u32> = BridgePlugin::from_dir(dir.path().join("gone"), "gone");
        assert!(!missing.load(&Loader(|| Ok(ModuleExport::Missing)), &mut api));
        assert!(api.calls.is_empty());
    }
}
