//! TTL cache fronting remote registry lookups.
//!
//! Entries expire lazily: an entry whose deadline has passed is treated as
//! absent (and dropped) the next time it is read. There is no background
//! sweep and no explicit invalidation, so callers must tolerate serving
//! slightly stale remote data for up to one TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Default lifetime of a cached registry response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(180);

/// Source of the current time for expiry checks.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// A cached value and its deadline. A TTL too large to represent never expires.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Key/value cache with per-entry time-to-live.
pub struct RegistryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegistryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCache").field("entries", &self.entries.lock().len()).finish()
    }
}

impl RegistryCache {
    /// Create a cache using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache using a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Get a live entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|deadline| now > deadline) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value for `ttl`.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let expires_at = self.clock.now().checked_add(ttl);
        self.entries.lock().insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Get a live entry decoded into `T`. Entries that no longer decode are ignored.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| serde_json::from_value(value).ok())
    }

    /// Encode and store a value for `ttl`.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl),
            Err(e) => tracing::warn!(error = %e, "Value not cacheable"),
        }
    }

    /// Number of stored entries, including ones that have expired but not been read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
