//! Mutual exclusion for package operations and the shared library link.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{PluginError, PluginResult};

/// Counts in-flight mutating package operations.
///
/// At most one holder exists at a time; a second caller is refused
/// immediately rather than queued.
#[derive(Debug, Default)]
pub struct InstallationGuard {
    active: AtomicUsize,
}

impl InstallationGuard {
    /// Create an idle guard.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the guard, or fail with the current in-flight count.
    pub fn try_acquire(self: &Arc<Self>) -> PluginResult<GuardTicket> {
        match self.active.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(GuardTicket { guard: Arc::clone(self) }),
            Err(active) => Err(PluginError::GuardBusy { active }),
        }
    }

    /// Number of operations in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`InstallationGuard`]; releases it on drop.
#[derive(Debug)]
pub struct GuardTicket {
    guard: Arc<InstallationGuard>,
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.guard.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The symlink exposing the shared native library to installed plugins.
///
/// The package manager treats the link as a conflicting nested dependency, so
/// it is removed while package operations run. Unlinks nest: the link is only
/// restored once every unlink has been matched by a relink.
#[derive(Debug)]
pub struct SharedLibraryLink {
    target: PathBuf,
    link: PathBuf,
    holds: Mutex<usize>,
}

impl SharedLibraryLink {
    /// Manage `link`, pointing at `target`.
    pub fn new(target: impl Into<PathBuf>, link: impl Into<PathBuf>) -> Self {
        Self { target: target.into(), link: link.into(), holds: Mutex::new(0) }
    }

    /// Path of the link itself.
    pub fn link_path(&self) -> &Path {
        &self.link
    }

    /// Number of unmatched unlinks.
    pub fn holds(&self) -> usize {
        *self.holds.lock()
    }

    /// Whether `link` resolves to the library itself rather than to a link.
    fn is_target(&self) -> bool {
        match (std::fs::canonicalize(&self.link), std::fs::canonicalize(&self.target)) {
            (Ok(link), Ok(target)) => link == target,
            _ => false,
        }
    }

    /// Remove the link. An absent link is not an error.
    ///
    /// Only a symlink, or a stale entry that is not the library itself, is
    /// removed. When the link path is the library, nothing is deleted.
    pub fn unlink(&self) -> PluginResult<()> {
        let mut holds = self.holds.lock();
        *holds += 1;

        match std::fs::symlink_metadata(&self.link) {
            Ok(meta) if meta.file_type().is_symlink() => remove_symlink(&self.link)?,
            Ok(_) if self.is_target() => {
                tracing::warn!(link = %self.link.display(), "Shared library link is the library itself, leaving it in place");
                return Ok(());
            }
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&self.link)?,
            Ok(_) => std::fs::remove_file(&self.link)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(link = %self.link.display(), "Shared library unlinked");
        Ok(())
    }

    /// Match one [`unlink`](Self::unlink), restoring the link when none remain.
    pub fn relink(&self) -> PluginResult<()> {
        let mut holds = self.holds.lock();
        *holds = holds.saturating_sub(1);

        if *holds > 0 {
            return Ok(());
        }

        if std::fs::symlink_metadata(&self.link).is_ok() {
            return Ok(());
        }

        if !self.target.exists() {
            tracing::warn!(library = %self.target.display(), "Shared library missing, not linking");
            return Ok(());
        }

        if let Some(parent) = self.link.parent() {
            std::fs::create_dir_all(parent)?;
        }

        symlink(&self.target, &self.link)?;

        tracing::debug!(link = %self.link.display(), "Shared library linked");
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Remove a symlink without following it.
fn remove_symlink(link: &Path) -> std::io::Result<()> {
    std::fs::remove_file(link).or_else(|_| std::fs::remove_dir(link))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_guard_is_exclusive() {
        let guard = InstallationGuard::new();

        let ticket = guard.try_acquire().unwrap();
        assert_eq!(guard.active(), 1);

        match guard.try_acquire() {
            Err(PluginError::GuardBusy { active }) => assert_eq!(active, 1),
            other => panic!("expected GuardBusy, got {other:?}"),
        }

        drop(ticket);
        assert_eq!(guard.active(), 0);
        assert!(guard.try_acquire().is_ok());
    }

    #[test]
    fn test_nested_unlink_relinks_once() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib").join("hap-nodejs");
        let link = dir.path().join("node_modules").join("hap-nodejs");
        std::fs::create_dir_all(&target).unwrap();

        let shared = SharedLibraryLink::new(&target, &link);
        shared.relink().unwrap();
        assert!(link.exists());

        shared.unlink().unwrap();
        shared.unlink().unwrap();
        assert!(std::fs::symlink_metadata(&link).is_err());

        shared.relink().unwrap();
        assert!(std::fs::symlink_metadata(&link).is_err());
        assert_eq!(shared.holds(), 1);

        shared.relink().unwrap();
        assert!(link.exists());
        assert_eq!(shared.holds(), 0);
    }

    #[test]
    fn test_library_at_link_path_survives() {
        let dir = TempDir::new().unwrap();
        let library = dir.path().join("node_modules").join("hap-nodejs");
        std::fs::create_dir_all(&library).unwrap();
        std::fs::write(library.join("package.json"), "{}").unwrap();

        let shared = SharedLibraryLink::new(&library, &library);
        shared.unlink().unwrap();
        shared.relink().unwrap();

        assert!(library.join("package.json").exists());
        assert_eq!(shared.holds(), 0);
    }

    #[test]
    fn test_default_layout_keeps_library() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string();

        let mut paths = crate::core::Settings::default().paths;
        paths.application = format!("{root}{}", paths.application.trim_start_matches('~'));
        paths.shared_library = format!("{root}{}", paths.shared_library);

        let library = paths.shared_library_target();
        std::fs::create_dir_all(&library).unwrap();
        std::fs::write(library.join("package.json"), "{}").unwrap();

        let shared = SharedLibraryLink::new(library.clone(), paths.shared_library_link());
        shared.relink().unwrap();
        shared.unlink().unwrap();
        assert!(library.join("package.json").exists());

        shared.relink().unwrap();
        assert!(paths.shared_library_link().join("package.json").exists());
    }

    #[test]
    fn test_absent_link_and_target_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let shared = SharedLibraryLink::new(dir.path().join("missing"), dir.path().join("link"));

        shared.unlink().unwrap();
        shared.relink().unwrap();
        assert!(std::fs::symlink_metadata(dir.path().join("link")).is_err());
    }
}
