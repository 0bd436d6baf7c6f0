//! Install locations and their root directories.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Target root a library is installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InstallLocation {
    /// Libraries managed by the user (sketchbook libraries folder)
    #[default]
    User,
    /// Libraries bundled with the IDE
    IdeBuiltin,
    /// Libraries vendored next to a single sketch
    Sketch,
}

impl InstallLocation {
    pub const ALL: [InstallLocation; 3] = [Self::User, Self::IdeBuiltin, Self::Sketch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::IdeBuiltin => "ide-builtin",
            Self::Sketch => "sketch",
        }
    }
}

impl fmt::Display for InstallLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "ide-builtin" | "builtin" => Ok(Self::IdeBuiltin),
            "sketch" => Ok(Self::Sketch),
            other => Err(anyhow!(
                "Unknown install location '{}' (expected user, ide-builtin or sketch)",
                other
            )),
        }
    }
}

/// Root directories of every install location.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationRoots {
    pub user: PathBuf,
    pub builtin: PathBuf,
    pub sketch: Option<PathBuf>,
}

impl LocationRoots {
    /// Root for `location`, or `None` when no sketch directory is configured.
    pub fn root(&self, location: InstallLocation) -> Option<&Path> {
        match location {
            InstallLocation::User => Some(&self.user),
            InstallLocation::IdeBuiltin => Some(&self.builtin),
            InstallLocation::Sketch => self.sketch.as_deref(),
        }
    }

    pub fn configured(&self) -> impl Iterator<Item = (InstallLocation, &Path)> {
        InstallLocation::ALL
            .into_iter()
            .filter_map(|location| self.root(location).map(|root| (location, root)))
    }
}

/// Directory name used for a library: characters outside `[A-Za-z0-9._-]`
/// become `_`.
pub fn library_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
