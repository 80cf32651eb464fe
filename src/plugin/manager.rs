//! Plugin manager tying the engine's services together.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::catalog::{InstalledPlugin, PluginCatalog};
use super::installer::{InstallationOrchestrator, OperationResult};
use super::probe::{CapabilityProbe, NodeProbe};
use super::process::{ProcessRunner, TokioProcessRunner};
use super::registry::{mark_installed, HttpFetch, RegistryClient, ReqwestFetch, SearchEntry};
use super::resolver::CapabilityResolver;
use super::types::{CapabilityRecord, PluginDescriptor};
use super::PluginResult;
use crate::core::{RegistryCache, Settings};

/// Owns the state shared by plugin operations: the registry cache, the
/// capability memo and the installation guard.
///
/// Everything that would otherwise be process-wide lives here, so separate
/// managers (one per test, say) never observe each other.
pub struct PluginManager {
    settings: Settings,
    cache: Arc<RegistryCache>,
    registry: Arc<RegistryClient>,
    resolver: Arc<CapabilityResolver>,
    catalog: PluginCatalog,
    orchestrator: InstallationOrchestrator,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("modules_dir", &self.resolver.modules_dir())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

impl PluginManager {
    /// Create a manager using the network, `node` and the configured package manager.
    pub fn new(settings: Settings) -> PluginResult<Self> {
        let http = Arc::new(ReqwestFetch::new(settings.registry.timeout())?);

        let probe = NodeProbe::new(
            settings.probe.node.clone(),
            settings.paths.storage_dir(),
            settings.paths.config_document(),
        )
        .with_timeout(std::time::Duration::from_secs(settings.probe.timeout_secs));

        Ok(Self::with_collaborators(settings, http, Arc::new(TokioProcessRunner), Arc::new(probe)))
    }

    /// Create a manager with explicit collaborators.
    pub fn with_collaborators(
        settings: Settings,
        http: Arc<dyn HttpFetch>,
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Self {
        let cache = Arc::new(RegistryCache::new());
        Self::with_cache(settings, cache, http, runner, probe)
    }

    /// Create a manager sharing an existing cache.
    pub fn with_cache(
        settings: Settings,
        cache: Arc<RegistryCache>,
        http: Arc<dyn HttpFetch>,
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Self {
        let modules = settings.paths.modules_dir();

        let registry = Arc::new(RegistryClient::new(
            http,
            Arc::clone(&cache),
            settings.registry.clone(),
            &settings.packages,
        ));
        let resolver = Arc::new(CapabilityResolver::new(modules.clone(), probe));

        let catalog = PluginCatalog::new(
            modules,
            settings.packages.host_package.clone(),
            settings.packages.trusted_scope.clone(),
            Arc::clone(&registry),
            Arc::clone(&resolver),
        );

        let orchestrator = InstallationOrchestrator::new(
            &settings,
            runner,
            Arc::clone(&registry),
            Arc::clone(&resolver),
        );

        Self { settings, cache, registry, resolver, catalog, orchestrator }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<RegistryCache> {
        &self.cache
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn resolver(&self) -> &CapabilityResolver {
        &self.resolver
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn orchestrator(&self) -> &InstallationOrchestrator {
        &self.orchestrator
    }

    /// Installed, recognized plugins declared in the config document.
    pub fn list(&self) -> BTreeMap<String, PluginDescriptor> {
        let config = self.orchestrator.config();
        self.catalog.list(&config.plugins, &self.orchestrator.dependencies())
    }

    /// Installed plugins with registry metadata.
    pub async fn installed(&self) -> Vec<InstalledPlugin> {
        let config = self.orchestrator.config();
        self.catalog.installed(&config.plugins, &self.orchestrator.dependencies()).await
    }

    /// Capabilities offered by `name`.
    pub async fn get_plugin_type(&self, name: &str) -> Vec<CapabilityRecord> {
        self.resolver.get_plugin_type(name).await
    }

    pub async fn install(&self, id: &str, tag: &str) -> OperationResult {
        self.orchestrator.install(id, tag).await
    }

    pub async fn uninstall(&self, id: &str) -> OperationResult {
        self.orchestrator.uninstall(id).await
    }

    pub async fn update(&self, id: &str, tag: &str) -> OperationResult {
        self.orchestrator.update(id, tag).await
    }

    /// Registry search with installed versions filled in.
    pub async fn search(&self, query: &str, keyword: &str, limit: usize) -> PluginResult<Vec<SearchEntry>> {
        let mut entries = self.registry.search(query, keyword, limit).await?;
        mark_installed(&mut entries, &self.list());
        Ok(entries)
    }

    /// Certified plugins in `category` with installed versions filled in.
    pub async fn certified(&self, category: &str) -> PluginResult<Vec<SearchEntry>> {
        let mut entries = self.registry.certified(category).await?;
        mark_installed(&mut entries, &self.list());
        Ok(entries)
    }
}
