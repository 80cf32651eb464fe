//! Install, uninstall and update through the package manager.
//!
//! Each operation holds the [`InstallationGuard`] for its whole duration and
//! removes the shared library link while the package manager runs. Whether an
//! operation succeeded is decided by the filesystem afterwards (is the
//! package's manifest present?), never by the package manager's exit code: a
//! crashed run that leaves a stale manifest behind is reported by what is on
//! disk.
//!
//! Package manager runs have no timeout: a hung run holds the guard, and every
//! other operation is refused, until the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::document::ConfigDocument;
use super::guard::{GuardTicket, InstallationGuard, SharedLibraryLink};
use super::manifest::{load_json, PackageManifest};
use super::process::{PackageManager, ProcessRunner};
use super::reconciler::ConfigReconciler;
use super::registry::RegistryClient;
use super::resolver::CapabilityResolver;
use super::types::{short_name, MANIFEST_FILE};
use super::PluginError;
use crate::core::Settings;

/// Why an operation was refused before it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Refusal {
    /// Another operation holds the guard.
    Busy,
    /// The package name is reserved or blocked.
    Blocked,
}

/// Outcome of a package operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    /// Operations in flight once this one finished (or was refused).
    pub active: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<Refusal>,
}

impl OperationResult {
    fn refused(refusal: Refusal, active: usize) -> Self {
        Self { success: false, active, refusal: Some(refusal) }
    }
}

/// In-memory copies of the files the host reads.
#[derive(Debug, Clone, Default)]
struct Snapshots {
    config: ConfigDocument,
    application: PackageManifest,
}

/// Where the orchestrator reads and writes.
#[derive(Debug, Clone)]
struct Layout {
    application: PathBuf,
    modules: PathBuf,
    manifest: PathBuf,
    config: PathBuf,
}

/// Serializes package operations and keeps the config document in step.
pub struct InstallationOrchestrator {
    layout: Layout,
    manager: PackageManager,
    trusted_scope: String,
    runner: Arc<dyn ProcessRunner>,
    registry: Arc<RegistryClient>,
    resolver: Arc<CapabilityResolver>,
    reconciler: ConfigReconciler,
    guard: Arc<InstallationGuard>,
    shared_library: Arc<SharedLibraryLink>,
    snapshots: RwLock<Snapshots>,
}

impl std::fmt::Debug for InstallationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationOrchestrator")
            .field("application", &self.layout.application)
            .field("manager", &self.manager)
            .field("active", &self.guard.active())
            .finish()
    }
}

impl InstallationOrchestrator {
    /// Create an orchestrator for the layout described by `settings`.
    pub fn new(
        settings: &Settings,
        runner: Arc<dyn ProcessRunner>,
        registry: Arc<RegistryClient>,
        resolver: Arc<CapabilityResolver>,
    ) -> Self {
        let paths = &settings.paths;

        let layout = Layout {
            application: paths.application_dir(),
            modules: paths.modules_dir(),
            manifest: paths.application_manifest(),
            config: paths.config_document(),
        };

        let shared_library = SharedLibraryLink::new(
            paths.shared_library_target(),
            paths.shared_library_link(),
        );

        let orchestrator = Self {
            layout,
            manager: settings.packages.manager.into(),
            trusted_scope: settings.packages.trusted_scope.clone(),
            runner,
            registry,
            reconciler: ConfigReconciler::new(Arc::clone(&resolver)),
            resolver,
            guard: InstallationGuard::new(),
            shared_library: Arc::new(shared_library),
            snapshots: RwLock::new(Snapshots::default()),
        };

        orchestrator.refresh();
        orchestrator
    }

    /// The guard serializing operations.
    pub fn guard(&self) -> &Arc<InstallationGuard> {
        &self.guard
    }

    /// The shared library link managed around operations.
    pub fn shared_library(&self) -> &Arc<SharedLibraryLink> {
        &self.shared_library
    }

    /// The config document as last loaded.
    pub fn config(&self) -> ConfigDocument {
        self.snapshots.read().config.clone()
    }

    /// Dependency names of the host application as last loaded.
    pub fn dependencies(&self) -> Vec<String> {
        self.snapshots.read().application.dependency_names()
    }

    /// Reload the config document and the application manifest from disk.
    pub fn refresh(&self) {
        let config = ConfigDocument::load(&self.layout.config);
        let application: PackageManifest = load_json(&self.layout.manifest);

        *self.snapshots.write() = Snapshots { config, application };
    }

    fn package_dir(&self, id: &str) -> PathBuf {
        self.layout.modules.join(id)
    }

    fn acquire(&self) -> Result<GuardTicket, OperationResult> {
        match self.guard.try_acquire() {
            Ok(ticket) => Ok(ticket),
            Err(PluginError::GuardBusy { active }) => {
                tracing::warn!(active, "Package operation already in progress");
                Err(OperationResult::refused(Refusal::Busy, active))
            }
            Err(e) => {
                tracing::error!(error = %e, "Unable to acquire installation guard");
                Err(OperationResult::refused(Refusal::Busy, self.guard.active()))
            }
        }
    }

    fn finish(&self, ticket: GuardTicket, success: bool) -> OperationResult {
        drop(ticket);
        OperationResult { success, active: self.guard.active(), refusal: None }
    }

    fn unlink_shared(&self) {
        if let Err(e) = self.shared_library.unlink() {
            tracing::warn!(error = %e, "Unable to unlink shared library");
        }
    }

    fn relink_shared(&self) {
        if let Err(e) = self.shared_library.relink() {
            tracing::warn!(error = %e, "Unable to relink shared library");
        }
    }

    async fn run(&self, args: Vec<String>) {
        let program = self.manager.program();

        match self.runner.run(program, &args, &self.layout.application).await {
            Ok(Some(0)) => {}
            Ok(code) => tracing::debug!(program, ?code, "Package manager exited abnormally"),
            Err(e) => tracing::error!(program, error = %e, "Unable to run package manager"),
        }
    }

    fn save(&self, doc: &ConfigDocument) {
        if let Err(e) = doc.save(&self.layout.config) {
            tracing::error!(path = %self.layout.config.display(), error = %e, "Unable to save config");
        }
    }

    /// Install `id` at `tag` (usually `latest`).
    pub async fn install(&self, id: &str, tag: &str) -> OperationResult {
        let ticket = match self.acquire() {
            Ok(ticket) => ticket,
            Err(refused) => return refused,
        };

        if self.registry.blocked().await.iter().any(|b| b == id) {
            let error = PluginError::BlockedPackage(id.to_string());
            tracing::error!(error = %error, "Refusing to install");
            drop(ticket);
            return OperationResult::refused(Refusal::Blocked, self.guard.active());
        }

        tracing::info!(plugin = id, tag, "Installing");

        self.unlink_shared();
        self.run(self.manager.install_args(id, tag)).await;

        let directory = self.package_dir(id);

        if !PackageManifest::exists_in(&directory) {
            let error = PluginError::NotFound(directory.join(MANIFEST_FILE));
            tracing::error!(plugin = id, error = %error, "Install failed");
            self.relink_shared();
            return self.finish(ticket, false);
        }

        let manifest = PackageManifest::from_dir(&directory).unwrap_or_default();
        let name = short_name(id);
        let mut doc = ConfigDocument::load(&self.layout.config);

        if manifest.is_registered_plugin() {
            self.reconciler.register_plugin(name, &mut doc);
        }

        if id.starts_with(&format!("@{}/", self.trusted_scope)) {
            self.remove_superseded(id, &mut doc).await;
        }

        self.resolver.forget(id);
        self.relink_shared();

        if manifest.is_recognized()
            && self.reconciler.get_platform(id, name, &mut doc).await.is_some()
        {
            tracing::debug!(plugin = id, "Platform configuration reconciled");
        }

        self.save(&doc);
        self.refresh();

        tracing::info!(plugin = id, version = %manifest.version, "Installed");
        self.finish(ticket, true)
    }

    /// Remove the community package a certified package replaces.
    async fn remove_superseded(&self, id: &str, doc: &mut ConfigDocument) {
        let lookup = match self.registry.lookup().await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!(error = %e, "Certified lookup unavailable");
                return;
            }
        };

        let Some(superseded) = lookup.certified.get(id) else {
            return;
        };

        tracing::info!(plugin = id, superseded = %superseded, "Removing superseded plugin");

        self.reconciler.detach_plugin(short_name(superseded), doc);
        self.run(self.manager.remove_superseded_args(superseded)).await;
        self.resolver.forget(superseded);
    }

    /// Remove `id`.
    pub async fn uninstall(&self, id: &str) -> OperationResult {
        let ticket = match self.acquire() {
            Ok(ticket) => ticket,
            Err(refused) => return refused,
        };

        tracing::info!(plugin = id, "Uninstalling");

        self.unlink_shared();
        self.run(self.manager.uninstall_args(id)).await;

        let success = !PackageManifest::exists_in(&self.package_dir(id));

        if success {
            let mut doc = ConfigDocument::load(&self.layout.config);
            self.reconciler.unlink_plugin(short_name(id), &mut doc);

            self.save(&doc);
            self.refresh();
            self.resolver.forget(id);

            tracing::info!(plugin = id, "Uninstalled");
        } else {
            tracing::error!(plugin = id, "Uninstall failed, package still on disk");
        }

        self.relink_shared();
        self.finish(ticket, success)
    }

    /// Move `id` to `tag`. Config entries are left alone.
    pub async fn update(&self, id: &str, tag: &str) -> OperationResult {
        let ticket = match self.acquire() {
            Ok(ticket) => ticket,
            Err(refused) => return refused,
        };

        tracing::info!(plugin = id, tag, "Updating");

        self.unlink_shared();
        self.run(self.manager.update_args(id, tag)).await;
        self.relink_shared();

        self.resolver.forget(id);
        self.refresh();

        let success = PackageManifest::exists_in(&self.package_dir(id));
        self.finish(ticket, success)
    }
}
