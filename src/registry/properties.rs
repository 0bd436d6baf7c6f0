//! Minimal reader for `library.properties` files.

use anyhow::{Result, anyhow};
use std::collections::HashMap;

use crate::catalog::Version;

/// Identity fields read from a `library.properties` file.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryProperties {
    pub name: String,
    pub version: Version,
}

impl LibraryProperties {
    /// Parses `key=value` lines; blank lines and `#` comments are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut values: HashMap<&str, &str> = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim(), value.trim());
            }
        }

        let name = values
            .get("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow!("missing 'name' property"))?;
        let version = values
            .get("version")
            .ok_or_else(|| anyhow!("missing 'version' property"))?;

        Ok(Self {
            name: name.to_string(),
            version: Version::parse(version)?,
        })
    }

    pub fn render(&self) -> String {
        format!("name={}\nversion={}\n", self.name, self.version)
    }
}
