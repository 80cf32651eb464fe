//! Plugin lifecycle engine for HomeKit bridge hosts.
//!
//! Plugins are npm packages installed into the host's `node_modules`. This
//! module discovers them, works out which capabilities (platforms and
//! accessories) they offer, drives the package manager to install, update and
//! remove them, and keeps the host's config document in step.
//!
//! # Architecture
//!
//! - [`PluginCatalog`] reads installed packages and merges registry metadata.
//! - [`CapabilityResolver`] classifies a plugin from its schema files, falling
//!   back to a [`CapabilityProbe`] that runs the plugin's entry module.
//! - [`InstallationOrchestrator`] serializes package operations behind an
//!   [`InstallationGuard`] and reconciles the config with [`ConfigReconciler`].
//! - [`RegistryClient`] answers registry queries through the TTL cache.
//! - [`PluginManager`] owns all of the above for one host instance.
//!
//! Network, subprocess and probe access go through traits ([`HttpFetch`],
//! [`ProcessRunner`], [`CapabilityProbe`]) so each piece can be exercised with
//! fakes.
//!
//! # Example Configuration
//!
//! ```toml
//! [paths]
//! application = "~/.hoobs"
//! shared_library = "/usr/local/lib/hoobs/node_modules/hap-nodejs"
//! config = "~/.hoobs/etc"
//! instance = "default"
//!
//! [packages]
//! manager = "yarn"
//! ```

mod bridge;
mod catalog;
mod document;
mod error;
mod guard;
mod installer;
mod manager;
mod manifest;
mod probe;
mod process;
mod reconciler;
mod registry;
mod resolver;
mod types;

pub use bridge::{BridgePlugin, InitializerFn, ModuleExport, ModuleLoader};
pub use catalog::{InstalledPlugin, PluginCatalog, PluginLinks};
pub use document::{AccessoryEntry, ConfigDocument, LinkedEntry, PlatformEntry, PluginMap};
pub use error::{PluginError, PluginResult};
pub use guard::{GuardTicket, InstallationGuard, SharedLibraryLink};
pub use installer::{InstallationOrchestrator, OperationResult, Refusal};
pub use manager::PluginManager;
pub use manifest::{load_json, read_json, save_json, schema_alias, PackageManifest};
pub use probe::{CapabilityCollector, CapabilityProbe, EntryExport, NodeProbe};
pub use process::{PackageManager, ProcessRunner, TokioProcessRunner};
pub use reconciler::ConfigReconciler;
pub use registry::{
    mark_installed, parse_changelog, CertifiedLookup, HttpFetch, PackageInfo, RegistryClient,
    Release, ReqwestFetch, SearchEntry,
};
pub use resolver::{entry_path, CapabilityResolver};
pub use types::{
    clean_description, full_name, short_name, split_package_name, AccessorySchema,
    CapabilityRecord, CapabilitySchema, CapabilityType, PlatformSchema, PluginDescriptor,
    ACCESSORIES_SCHEMA_FILE, CONFIG_SCHEMA_FILE, MANIFEST_FILE, PLATFORM_SCHEMA_FILE,
    RECOGNIZED_KEYWORDS, REGISTERED_KEYWORDS,
};
