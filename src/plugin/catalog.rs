//! Installed plugin discovery.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};

use super::manifest::PackageManifest;
use super::registry::RegistryClient;
use super::resolver::CapabilityResolver;
use super::types::{
    clean_description, split_package_name, CapabilityRecord, CapabilitySchema, PluginDescriptor,
};
use crate::core::check_version;

/// Where to find out more about an installed plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

/// An installed plugin merged with its registry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub scope: Option<String>,
    /// Capabilities the plugin offers.
    pub details: Vec<CapabilityRecord>,
    /// Whether registry metadata was unavailable.
    pub local: bool,
    /// Latest published version (the installed one for local plugins).
    pub version: Option<String>,
    pub installed: Option<String>,
    pub date: Option<String>,
    pub description: String,
    pub keywords: Vec<String>,
    pub links: PluginLinks,
    pub schema: CapabilitySchema,
}

impl InstalledPlugin {
    /// Whether a newer version than the installed one is published.
    pub fn has_update(&self) -> bool {
        match (&self.installed, &self.version) {
            (Some(installed), Some(latest)) => check_version(installed, latest),
            _ => false,
        }
    }
}

/// Finds plugins installed in the host's modules directory.
pub struct PluginCatalog {
    modules_dir: PathBuf,
    host_package: String,
    trusted_scope: String,
    registry: Arc<RegistryClient>,
    resolver: Arc<CapabilityResolver>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog").field("modules_dir", &self.modules_dir).finish()
    }
}

/// Resolve a declared plugin to an installed dependency: exact, or `@scope/name`.
fn resolve_dependency<'a>(declared: &str, dependencies: &'a [String]) -> Option<&'a String> {
    dependencies.iter().find(|d| d.as_str() == declared).or_else(|| {
        let suffix = format!("/{declared}");
        dependencies.iter().find(|d| d.starts_with('@') && d.ends_with(&suffix))
    })
}

impl PluginCatalog {
    /// Create a catalog.
    pub fn new(
        modules_dir: impl Into<PathBuf>,
        host_package: impl Into<String>,
        trusted_scope: impl Into<String>,
        registry: Arc<RegistryClient>,
        resolver: Arc<CapabilityResolver>,
    ) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            host_package: host_package.into(),
            trusted_scope: trusted_scope.into(),
            registry,
            resolver,
        }
    }

    /// Descriptors for the declared plugins that are installed and recognized,
    /// keyed by full package name.
    ///
    /// Reads only the local filesystem.
    pub fn list(
        &self,
        declared: &[String],
        dependencies: &[String],
    ) -> BTreeMap<String, PluginDescriptor> {
        let mut modules: Vec<&String> =
            declared.iter().filter_map(|name| resolve_dependency(name, dependencies)).collect();

        modules.sort();
        modules.dedup();

        let mut results = BTreeMap::new();

        for module in modules {
            let directory = self.modules_dir.join(module);
            tracing::debug!(directory = %directory.display(), "Reading plugin");

            let Some(manifest) = PackageManifest::from_dir(&directory) else {
                continue;
            };

            if !manifest.is_recognized() {
                continue;
            }

            let full = if manifest.name.is_empty() { module.clone() } else { manifest.name.clone() };
            let (scope, name) = split_package_name(&full);

            results.insert(
                full,
                PluginDescriptor {
                    name,
                    scope,
                    version: manifest.version.clone(),
                    schema: CapabilitySchema::read(&directory),
                    directory,
                    description: clean_description(&manifest.description),
                    keywords: manifest.keywords.into_iter().collect(),
                },
            );
        }

        results
    }

    /// Installed plugins with registry metadata: certified first, then
    /// community, then plugins the registry does not know.
    ///
    /// Lookups run concurrently; order within each group follows completion
    /// order and may differ between calls.
    pub async fn installed(&self, declared: &[String], dependencies: &[String]) -> Vec<InstalledPlugin> {
        let listed = self.list(declared, dependencies);

        let mut lookups: FuturesUnordered<_> = listed
            .into_iter()
            .filter(|(full, descriptor)| {
                full != &self.host_package && descriptor.name != self.host_package
            })
            .map(|(full, descriptor)| async move {
                let remote = self.registry.package(&full, Some(descriptor.version.as_str())).await;
                let details = self.resolver.get_plugin_type(&full).await;
                (descriptor, details, remote)
            })
            .collect();

        let mut certified = Vec::new();
        let mut community = Vec::new();
        let mut local = Vec::new();

        while let Some((descriptor, details, remote)) = lookups.next().await {
            match remote {
                Ok(info) => {
                    let row = InstalledPlugin {
                        name: info.name,
                        scope: info.scope,
                        details,
                        local: false,
                        version: info.version,
                        installed: info.installed,
                        date: info.date,
                        description: info.description,
                        keywords: info.keywords,
                        links: PluginLinks { homepage: info.homepage, directory: None },
                        schema: descriptor.schema,
                    };

                    if row.scope.as_deref() == Some(self.trusted_scope.as_str()) {
                        certified.push(row);
                    } else {
                        community.push(row);
                    }
                }
                Err(e) => {
                    tracing::debug!(plugin = %descriptor.full_name(), error = %e, "Using local metadata");

                    local.push(InstalledPlugin {
                        name: descriptor.name,
                        scope: descriptor.scope,
                        details,
                        local: true,
                        version: Some(descriptor.version.clone()),
                        installed: Some(descriptor.version),
                        date: Some(chrono::Utc::now().to_rfc3339()),
                        description: descriptor.description,
                        keywords: descriptor.keywords.into_iter().collect(),
                        links: PluginLinks { homepage: None, directory: Some(descriptor.directory) },
                        schema: descriptor.schema,
                    });
                }
            }
        }

        certified.into_iter().chain(community).chain(local).collect()
    }
}
