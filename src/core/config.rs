//! Configuration management for hbpm.
//!
//! Handles loading settings from TOML files. These are the manager's own
//! settings (where the host lives, which package manager to drive, where the
//! registry is); the host's config document is handled by
//! [`crate::plugin::ConfigDocument`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Filesystem layout of the host
    pub paths: PathsConfig,

    /// Package manager settings
    pub packages: PackagesConfig,

    /// Remote registry settings
    pub registry: RegistryConfig,

    /// Dynamic capability probe settings
    pub probe: ProbeConfig,
}

/// Filesystem layout of the bridge host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Plugin root (holds the plugins' `package.json` and `node_modules`)
    pub application: String,

    /// Root directory for instance config documents
    pub config: String,

    /// Instance name; the config document lives at `<config>/<instance>/config.json`
    pub instance: String,

    /// Storage path handed to plugins
    pub storage: String,

    /// Target of the shared native library symlink
    pub shared_library: String,

    /// Name of the shared library link inside the modules directory
    pub shared_library_name: String,
}

/// Which package manager drives installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    /// npm
    #[default]
    Npm,
    /// Yarn (classic)
    Yarn,
}

/// Package manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesConfig {
    /// Primary package manager
    pub manager: PackageManagerKind,

    /// The host package itself, never listed as a plugin
    pub host_package: String,

    /// Trusted first-party scope (without `@`)
    pub trusted_scope: String,

    /// Reserved package names that may never be installed
    pub blocked: Vec<String>,
}

/// Remote registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// npm registry base URL
    pub npm_url: String,

    /// Base URL of the certified plugin index (`categories.json`, `plugins.json`)
    pub certified_url: String,

    /// Base URL for certified plugin images
    pub images_url: String,

    /// URL of the host changelog
    pub changelog_url: String,

    /// Package whose versions make up the release list
    pub release_package: String,

    /// Lifetime of cached responses
    pub cache_ttl_secs: u64,

    /// HTTP request timeout
    pub timeout_secs: u64,
}

/// Dynamic capability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Node interpreter used to run plugin entry modules
    pub node: String,

    /// Maximum time a single probe may run
    pub timeout_secs: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            application: "~/.hoobs".to_string(),
            config: "~/.hoobs/etc".to_string(),
            instance: String::new(),
            storage: "~/.hoobs".to_string(),
            shared_library: "/usr/local/lib/hoobs/node_modules/hap-nodejs".to_string(),
            shared_library_name: "hap-nodejs".to_string(),
        }
    }
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            manager: PackageManagerKind::Npm,
            host_package: "homebridge".to_string(),
            trusted_scope: "hoobs".to_string(),
            blocked: [
                "hoobs-core",
                "homebridge",
                "homebridge-server",
                "homebridge-to-hoobs",
                "homebridge-config-ui",
                "homebridge-config-ui-x",
                "homebridge-config-ui-rdp",
                "homebridge-config-ui-hoobs",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            npm_url: "https://registry.npmjs.org".to_string(),
            certified_url: "https://raw.githubusercontent.com/hoobs-org/HOOBS/master/certified"
                .to_string(),
            images_url: "https://raw.githubusercontent.com/hoobs-org/hoobs-images/master/certified"
                .to_string(),
            changelog_url:
                "https://raw.githubusercontent.com/hoobs-org/hoobs-core/master/CHANGELOG.md"
                    .to_string(),
            release_package: "@hoobs/hoobs".to_string(),
            cache_ttl_secs: 180,
            timeout_secs: 30,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { node: "node".to_string(), timeout_secs: 30 }
    }
}

/// Expand `~` and environment variables, leaving the input untouched on failure.
fn expand(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}

impl PathsConfig {
    /// Host application root.
    pub fn application_dir(&self) -> PathBuf {
        expand(&self.application)
    }

    /// Directory plugins are installed into.
    pub fn modules_dir(&self) -> PathBuf {
        self.application_dir().join("node_modules")
    }

    /// Host application manifest.
    pub fn application_manifest(&self) -> PathBuf {
        self.application_dir().join("package.json")
    }

    /// Config root for all instances.
    pub fn config_root(&self) -> PathBuf {
        expand(&self.config)
    }

    /// The instance's config document.
    pub fn config_document(&self) -> PathBuf {
        self.config_root().join(&self.instance).join("config.json")
    }

    /// Storage path handed to plugins.
    pub fn storage_dir(&self) -> PathBuf {
        expand(&self.storage)
    }

    /// Target of the shared library link.
    pub fn shared_library_target(&self) -> PathBuf {
        expand(&self.shared_library)
    }

    /// Location of the shared library link.
    pub fn shared_library_link(&self) -> PathBuf {
        self.modules_dir().join(&self.shared_library_name)
    }
}

impl RegistryConfig {
    /// Cache lifetime as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// HTTP timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Load settings from the default location.
    ///
    /// Looks for settings in:
    /// 1. `hbpm.toml` in current directory
    /// 2. `~/.config/hbpm/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local = PathBuf::from("hbpm.toml");
        if local.exists() {
            return Self::load_from_file(&local);
        }

        if let Some(global) = Self::config_dir().map(|d| d.join("config.toml")) {
            if global.exists() {
                return Self::load_from_file(&global);
            }
        }

        Ok(Self::default())
    }

    /// Load settings from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Get the settings directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hbpm"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.packages.manager, PackageManagerKind::Npm);
        assert_eq!(settings.packages.trusted_scope, "hoobs");
        assert_eq!(settings.registry.cache_ttl(), Duration::from_secs(180));
        assert!(settings.packages.blocked.contains(&"homebridge".to_string()));
    }

    #[test]
    fn test_settings_deserialization() {
        let toml_str = r#"
            [paths]
            application = "/opt/bridge"
            config = "/etc/bridge"
            instance = "living-room"

            [packages]
            manager = "yarn"
        "#;

        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.packages.manager, PackageManagerKind::Yarn);
        assert_eq!(settings.paths.modules_dir(), PathBuf::from("/opt/bridge/node_modules"));
        assert_eq!(
            settings.paths.config_document(),
            PathBuf::from("/etc/bridge/living-room/config.json")
        );
        assert_eq!(
            settings.paths.shared_library_link(),
            PathBuf::from("/opt/bridge/node_modules/hap-nodejs")
        );
        // untouched sections keep their defaults
        assert_eq!(settings.registry.npm_url, "https://registry.npmjs.org");
    }

    #[test]
    fn test_default_shared_library_is_outside_plugin_modules() {
        let paths = Settings::default().paths;

        assert_ne!(paths.shared_library_target(), paths.shared_library_link());
        assert!(!paths.shared_library_target().starts_with(paths.modules_dir()));
        assert!(paths.shared_library_link().starts_with(paths.modules_dir()));
    }

    #[test]
    fn test_empty_instance_uses_config_root() {
        let toml_str = r#"
            [paths]
            config = "/etc/bridge"
        "#;

        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.paths.config_document(), PathBuf::from("/etc/bridge/config.json"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hbpm.toml");
        std::fs::write(&path, "[probe]\ntimeout_secs = 5\n").unwrap();

        let settings = Settings::load_from_file(&path).unwrap();
        assert_eq!(settings.probe.timeout_secs, 5);
        assert_eq!(settings.probe.node, "node");
    }
}
