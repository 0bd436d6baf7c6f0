//! Catalog release types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Version, VersionConstraint};

/// Value identity of a release: library name plus exact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseId {
    pub name: String,
    pub version: Version,
}

impl ReleaseId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A dependency edge declared by a release.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub constraint: VersionConstraint,
}

/// The downloadable archive of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub url: String,
    pub archive_file_name: String,
    #[serde(default)]
    pub size: u64,
    /// `SHA-256:<hex>`; empty when the index carries no checksum.
    #[serde(default)]
    pub checksum: String,
}

/// An immutable catalog entry for one version of a library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryRelease {
    pub name: String,
    pub version: Version,
    pub dependencies: Vec<Dependency>,
    pub resource: Resource,
}

impl LibraryRelease {
    pub fn id(&self) -> ReleaseId {
        ReleaseId::new(self.name.clone(), self.version.clone())
    }
}

impl fmt::Display for LibraryRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
