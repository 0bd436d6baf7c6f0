//! Installation registry: the libraries currently installed per location.
//!
//! The registry is built by scanning every configured location root and is
//! only mutated by the installation executor while it holds the installer
//! lease. Entries are never edited in place; replacing a library removes
//! the old entry and records a new one.

mod location;
mod properties;

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::catalog::{ReleaseId, Version};
use crate::runtime::Runtime;

pub use location::{InstallLocation, LocationRoots, library_dir_name};
pub use properties::LibraryProperties;

pub const PROPERTIES_FILE: &str = "library.properties";

/// A library present on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledLibrary {
    pub name: String,
    pub version: Version,
    pub install_dir: PathBuf,
    pub location: InstallLocation,
}

impl InstalledLibrary {
    pub fn id(&self) -> ReleaseId {
        ReleaseId::new(self.name.clone(), self.version.clone())
    }
}

impl fmt::Display for InstalledLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallationRegistry {
    libraries: Vec<InstalledLibrary>,
}

impl InstallationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_libraries(libraries: impl IntoIterator<Item = InstalledLibrary>) -> Self {
        let mut registry = Self::new();
        for library in libraries {
            registry.record(library, None);
        }
        registry
    }

    /// Scans every configured location root for installed libraries.
    ///
    /// Missing roots are treated as empty. Directories without a readable
    /// `library.properties` are skipped with a warning.
    #[tracing::instrument(skip(runtime, roots))]
    pub fn scan<R: Runtime>(runtime: &R, roots: &LocationRoots) -> Result<Self> {
        let mut registry = Self::new();
        for (location, root) in roots.configured() {
            registry.scan_root(runtime, location, root)?;
        }
        debug!("Registry holds {} installed libraries", registry.libraries.len());
        Ok(registry)
    }

    fn scan_root<R: Runtime>(
        &mut self,
        runtime: &R,
        location: InstallLocation,
        root: &Path,
    ) -> Result<()> {
        if !runtime.exists(root) {
            debug!("Location {} root {:?} does not exist", location, root);
            return Ok(());
        }

        let entries = runtime
            .read_dir(root)
            .with_context(|| format!("Failed to list libraries in {:?}", root))?;

        for dir in entries {
            // Hidden entries are staging leftovers of interrupted installs
            if dir
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'))
            {
                debug!("Skipping hidden entry {:?}", dir);
                continue;
            }
            let properties_path = dir.join(PROPERTIES_FILE);
            if !runtime.is_dir(&dir) || !runtime.exists(&properties_path) {
                continue;
            }
            let properties = runtime
                .read_to_string(&properties_path)
                .and_then(|content| LibraryProperties::parse(&content));
            match properties {
                Ok(props) => self.record(
                    InstalledLibrary {
                        name: props.name,
                        version: props.version,
                        install_dir: dir,
                        location,
                    },
                    None,
                ),
                Err(e) => warn!("Ignoring library in {:?}: {}", dir, e),
            }
        }
        Ok(())
    }

    pub fn libraries(&self) -> &[InstalledLibrary] {
        &self.libraries
    }

    pub fn in_location(&self, location: InstallLocation) -> impl Iterator<Item = &InstalledLibrary> {
        self.libraries
            .iter()
            .filter(move |library| library.location == location)
    }

    /// The library named `name` installed in `location`, if any.
    pub fn find(&self, name: &str, location: InstallLocation) -> Option<&InstalledLibrary> {
        self.in_location(location).find(|library| library.name == name)
    }

    /// Adds `library`, dropping `replaced` first when given.
    pub fn record(&mut self, library: InstalledLibrary, replaced: Option<&InstalledLibrary>) {
        if let Some(old) = replaced {
            self.remove(old);
        }
        self.libraries.push(library);
        self.libraries
            .sort_by(|a, b| (a.location, &a.name, &a.version).cmp(&(b.location, &b.name, &b.version)));
    }

    /// Removes `library`; returns whether an entry was dropped.
    pub fn remove(&mut self, library: &InstalledLibrary) -> bool {
        let before = self.libraries.len();
        self.libraries.retain(|l| l != library);
        before != self.libraries.len()
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}
