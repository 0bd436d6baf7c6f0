//! Shared library state and the leases that guard it.
//!
//! A [`LibraryManager`] owns the catalog and the installation registry
//! behind a `tokio::sync::RwLock`. Read-only work takes an
//! [`ExplorerLease`]; installs take the single [`InstallerLease`]. Leases
//! are owned guards released on drop, so every exit path of the holding
//! scope gives them back. The lock queues waiters fairly: an installer
//! waits for current explorers to drain and explorers arriving after it
//! wait for the installer.

use log::{debug, info};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::catalog::LibraryCatalog;
use crate::error::LibraryError;
use crate::registry::{InstallationRegistry, LocationRoots};
use crate::runtime::Runtime;

/// Catalog and installed set as seen by one session.
#[derive(Debug, Clone, Default)]
pub struct LibraryState {
    pub catalog: LibraryCatalog,
    pub registry: InstallationRegistry,
    pub roots: LocationRoots,
}

impl LibraryState {
    pub fn new(catalog: LibraryCatalog, registry: InstallationRegistry, roots: LocationRoots) -> Self {
        Self {
            catalog,
            registry,
            roots,
        }
    }

    /// Loads the catalog from `catalog_path` and scans every location root.
    pub fn load<R: Runtime>(
        runtime: &R,
        catalog_path: &Path,
        roots: LocationRoots,
    ) -> Result<Self, LibraryError> {
        let catalog = LibraryCatalog::load(runtime, catalog_path).map_err(LibraryError::Catalog)?;
        let registry = InstallationRegistry::scan(runtime, &roots).map_err(LibraryError::Registry)?;
        Ok(Self::new(catalog, registry, roots))
    }
}

/// Hands out leases over a [`LibraryState`].
#[derive(Clone)]
pub struct LibraryManager {
    state: Arc<RwLock<LibraryState>>,
}

impl LibraryManager {
    pub fn new(state: LibraryState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Shared read access; any number may be held at once.
    pub async fn explorer(&self) -> ExplorerLease {
        ExplorerLease {
            guard: Arc::clone(&self.state).read_owned().await,
        }
    }

    /// Exclusive access for installs; waits until no other lease is held.
    pub async fn installer(&self) -> InstallerLease {
        debug!("Waiting for installer lease...");
        let guard = Arc::clone(&self.state).write_owned().await;
        debug!("Installer lease acquired");
        InstallerLease { guard }
    }
}

pub struct ExplorerLease {
    guard: OwnedRwLockReadGuard<LibraryState>,
}

impl Deref for ExplorerLease {
    type Target = LibraryState;

    fn deref(&self) -> &LibraryState {
        &self.guard
    }
}

pub struct InstallerLease {
    guard: OwnedRwLockWriteGuard<LibraryState>,
}

impl Deref for InstallerLease {
    type Target = LibraryState;

    fn deref(&self) -> &LibraryState {
        &self.guard
    }
}

impl DerefMut for InstallerLease {
    fn deref_mut(&mut self) -> &mut LibraryState {
        &mut self.guard
    }
}

impl Drop for InstallerLease {
    fn drop(&mut self) {
        debug!("Installer lease released");
    }
}

/// A running instance of the library manager: the shared state plus the
/// runtime and downloads directory install requests work with.
pub struct Session<R: Runtime> {
    runtime: Arc<R>,
    manager: LibraryManager,
    downloads_dir: PathBuf,
}

impl<R: Runtime> Session<R> {
    pub fn new(runtime: Arc<R>, state: LibraryState, downloads_dir: PathBuf) -> Self {
        Self {
            runtime,
            manager: LibraryManager::new(state),
            downloads_dir,
        }
    }

    /// Loads the catalog and scans installed libraries.
    #[tracing::instrument(skip(runtime, roots))]
    pub fn open(
        runtime: Arc<R>,
        catalog_path: &Path,
        roots: LocationRoots,
        downloads_dir: PathBuf,
    ) -> Result<Self, LibraryError> {
        let state = LibraryState::load(runtime.as_ref(), catalog_path, roots)?;
        Ok(Self::new(runtime, state, downloads_dir))
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn manager(&self) -> &LibraryManager {
        &self.manager
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Rescans the installed set so later leases observe what is on disk.
    /// Runs under the caller's installer lease.
    pub fn reinitialize(&self, lease: &mut InstallerLease) -> Result<(), LibraryError> {
        let registry = InstallationRegistry::scan(self.runtime.as_ref(), &lease.roots)
            .map_err(LibraryError::Commit)?;
        info!("Reloaded {} installed libraries", registry.len());
        lease.registry = registry;
        Ok(())
    }
}
