//! Core building blocks shared by the plugin engine.
//!
//! This module contains the manager's settings, the TTL cache fronting
//! registry lookups, and version ordering.

mod cache;
mod config;
mod version;

pub use cache::{Clock, ManualClock, RegistryCache, SystemClock, DEFAULT_TTL};
pub use config::{
    PackageManagerKind, PackagesConfig, PathsConfig, ProbeConfig, RegistryConfig, Settings,
};
pub use version::{check_version, compare_versions, sort_newest_first};
