//! Library versions and version constraints.
//!
//! Catalog versions are semantic versions, but library authors routinely
//! publish `1.2` or `v2.0.1`; parsing is lenient about both and the
//! original text is kept for display.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A totally ordered library version.
#[derive(Debug, Clone)]
pub struct Version {
    semver: semver::Version,
    raw: String,
}

impl Version {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let normalized = normalize(trimmed.strip_prefix('v').unwrap_or(trimmed));
        let semver = semver::Version::parse(&normalized)
            .map_err(|e| anyhow!("Invalid version '{}': {}", text, e))?;
        Ok(Self {
            semver,
            raw: trimmed.to_string(),
        })
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.semver
    }
}

/// Pads `1` and `1.2` to three components, leaving pre-release and build
/// suffixes in place.
fn normalize(text: &str) -> String {
    let split_at = text.find(['-', '+']).unwrap_or(text.len());
    let (core, suffix) = text.split_at(split_at);
    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    format!("{}{}", parts.join("."), suffix)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.semver == other.semver
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.semver.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.semver.cmp(&other.semver)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Which releases of a library satisfy a request or a dependency edge.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VersionConstraint {
    /// Newest release in the catalog
    #[default]
    Latest,
    /// Exactly this version
    Exact(Version),
    /// Any release matching a semver requirement (e.g. ">=1.2.0", "^2")
    Req(semver::VersionReq),
}

impl VersionConstraint {
    /// Parses a user or catalog supplied constraint.
    ///
    /// Empty text means [`VersionConstraint::Latest`]; a plain version means
    /// [`VersionConstraint::Exact`]; anything else must be a semver requirement.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::Latest);
        }
        if let Ok(version) = Version::parse(trimmed) {
            return Ok(Self::Exact(version));
        }
        semver::VersionReq::parse(trimmed)
            .map(Self::Req)
            .map_err(|e| anyhow!("Invalid version constraint '{}': {}", text, e))
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Latest => true,
            Self::Exact(exact) => exact == version,
            Self::Req(req) => req.matches(version.as_semver()),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(version) => write!(f, "{}", version),
            Self::Req(req) => write!(f, "{}", req),
        }
    }
}
