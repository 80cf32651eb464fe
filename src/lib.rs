//! # hbpm
//!
//! Plugin lifecycle manager for HomeKit bridge hosts.
//!
//! hbpm discovers the plugins installed in a bridge host, works out which
//! platforms and accessories each one offers, installs, updates and removes
//! them through npm or Yarn, and keeps the host's config document linked to
//! what is installed.
//!
//! ## Features
//!
//! - **Discovery**: Lists installed plugins and merges npm registry metadata
//! - **Classification**: Reads schema files, or probes the plugin's entry module
//! - **Safe installs**: One package operation at a time, refused rather than queued
//! - **Config reconciliation**: Links platform blocks to the plugins that serve them
//!
//! ## Quick Start
//!
//! ```bash
//! # List installed plugins
//! hbpm list
//!
//! # Install a plugin
//! hbpm install homebridge-ring
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::result_large_err)]

pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use crate::core::{RegistryCache, Settings};
pub use plugin::{
    CapabilityRecord, CapabilityType, ConfigDocument, InstalledPlugin, OperationResult,
    PluginError, PluginManager, PluginResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "hbpm";
