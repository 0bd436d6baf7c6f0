//! Library catalog: the read-only index of available library releases.
//!
//! The catalog is loaded once per session from a JSON index shaped like
//!
//! ```json
//! { "libraries": [ { "name": "Servo", "version": "1.2.0",
//!     "url": "...", "archiveFileName": "Servo-1.2.0.zip",
//!     "size": 1234, "checksum": "SHA-256:...",
//!     "dependencies": [ { "name": "Wire", "version": ">=1.0" } ] } ] }
//! ```
//!
//! Fetching or refreshing that file is not this crate's business.

mod release;
mod version;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LibraryError;
use crate::runtime::Runtime;

pub use release::{Dependency, LibraryRelease, ReleaseId, Resource};
pub use version::{Version, VersionConstraint};

#[derive(Deserialize)]
struct IndexFile {
    #[serde(default)]
    libraries: Vec<IndexEntry>,
}

#[derive(Deserialize)]
struct IndexEntry {
    name: String,
    version: String,
    #[serde(flatten)]
    resource: Resource,
    #[serde(default)]
    dependencies: Vec<IndexDependency>,
}

#[derive(Deserialize)]
struct IndexDependency {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

/// Immutable index mapping library name to its available releases.
#[derive(Debug, Clone, Default)]
pub struct LibraryCatalog {
    // Releases per name, sorted by ascending version
    libraries: BTreeMap<String, Vec<LibraryRelease>>,
}

impl LibraryCatalog {
    /// Builds a catalog from already parsed releases.
    pub fn from_releases(releases: impl IntoIterator<Item = LibraryRelease>) -> Self {
        let mut libraries: BTreeMap<String, Vec<LibraryRelease>> = BTreeMap::new();
        for release in releases {
            libraries
                .entry(release.name.clone())
                .or_default()
                .push(release);
        }
        for releases in libraries.values_mut() {
            releases.sort_by(|a, b| a.version.cmp(&b.version));
            releases.dedup_by(|a, b| a.version == b.version);
        }
        Self { libraries }
    }

    /// Parses the JSON index. Entries with unparseable versions are skipped.
    pub fn from_json(json: &str) -> Result<Self> {
        let index: IndexFile = serde_json::from_str(json).context("Failed to parse library index")?;
        let mut releases = Vec::with_capacity(index.libraries.len());

        for entry in index.libraries {
            let version = match Version::parse(&entry.version) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping {} {}: {}", entry.name, entry.version, e);
                    continue;
                }
            };
            let mut dependencies = Vec::with_capacity(entry.dependencies.len());
            for dep in entry.dependencies {
                let constraint = match dep.version.as_deref() {
                    Some(text) => VersionConstraint::parse(text).with_context(|| {
                        format!("Invalid dependency {} of {}@{}", dep.name, entry.name, version)
                    })?,
                    None => VersionConstraint::Latest,
                };
                dependencies.push(Dependency {
                    name: dep.name,
                    constraint,
                });
            }
            releases.push(LibraryRelease {
                name: entry.name,
                version,
                dependencies,
                resource: entry.resource,
            });
        }

        let catalog = Self::from_releases(releases);
        debug!("Loaded catalog with {} libraries", catalog.libraries.len());
        Ok(catalog)
    }

    /// Loads the index file through the runtime.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let content = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read library index {:?}", path))?;
        Self::from_json(&content)
    }

    /// All releases of `name`, oldest first.
    pub fn releases(&self, name: &str) -> &[LibraryRelease] {
        self.libraries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, name: &str) -> Option<&LibraryRelease> {
        self.releases(name).last()
    }

    /// The newest release of `name` satisfying `constraint`.
    pub fn find_release(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> Result<&LibraryRelease, LibraryError> {
        self.releases(name)
            .iter()
            .rev()
            .find(|release| constraint.matches(&release.version))
            .ok_or_else(|| LibraryError::NotFound {
                library: name.to_string(),
                constraint: constraint.clone(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.libraries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}
