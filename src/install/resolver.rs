//! Dependency resolution against the catalog.

use log::debug;
use std::collections::{BTreeMap, VecDeque};

use crate::catalog::{LibraryCatalog, Version, VersionConstraint};
use crate::error::LibraryError;

/// One library a request needs, at most one per name.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyRequirement {
    pub name: String,
    pub version: VersionConstraint,
}

pub type Requirements = BTreeMap<String, DependencyRequirement>;

/// Computes the transitive set of libraries a root request needs.
///
/// Every edge is resolved to the newest catalog release matching its
/// constraint. A library already picked through another edge is kept when
/// it satisfies the new edge; otherwise resolution fails. The registry of
/// installed libraries is never consulted.
pub struct DependencyResolver<'a> {
    catalog: &'a LibraryCatalog,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(catalog: &'a LibraryCatalog) -> Self {
        Self { catalog }
    }

    #[tracing::instrument(skip(self))]
    pub fn resolve(
        &self,
        root: &str,
        constraint: &VersionConstraint,
        allow_dependencies: bool,
    ) -> Result<Requirements, LibraryError> {
        if !allow_dependencies {
            return Ok(BTreeMap::from([(
                root.to_string(),
                DependencyRequirement {
                    name: root.to_string(),
                    version: constraint.clone(),
                },
            )]));
        }

        let mut picked: BTreeMap<String, Version> = BTreeMap::new();
        let mut pending = VecDeque::from([(root.to_string(), constraint.clone())]);

        while let Some((name, constraint)) = pending.pop_front() {
            if let Some(existing) = picked.get(&name) {
                if constraint.matches(existing) {
                    continue;
                }
                let wanted = self.catalog.find_release(&name, &constraint)?;
                return Err(LibraryError::DependencyConflict {
                    library: name,
                    required: existing.clone(),
                    conflicting: wanted.version.clone(),
                });
            }

            let release = self.catalog.find_release(&name, &constraint)?;
            debug!("Resolved {} ({}) to {}", name, constraint, release.version);
            picked.insert(name, release.version.clone());
            for dep in &release.dependencies {
                pending.push_back((dep.name.clone(), dep.constraint.clone()));
            }
        }

        Ok(picked
            .into_iter()
            .map(|(name, version)| {
                let requirement = DependencyRequirement {
                    name: name.clone(),
                    version: VersionConstraint::Exact(version),
                };
                (name, requirement)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{catalog, release};

    fn exact(v: &str) -> VersionConstraint {
        VersionConstraint::parse(v).unwrap()
    }

    #[test]
    fn test_no_dependencies_returns_root_only() {
        let catalog = catalog(vec![release("Display", "2.0.0", &[("GFX", "1.0.0"), ("Wire", "")])]);

        let requirements = DependencyResolver::new(&catalog)
            .resolve("Display", &exact("2.0.0"), false)
            .unwrap();

        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements["Display"].version, exact("2.0.0"));
    }

    #[test]
    fn test_no_dependencies_skips_catalog_lookup() {
        let requirements = DependencyResolver::new(&LibraryCatalog::default())
            .resolve("Unknown", &VersionConstraint::Latest, false)
            .unwrap();
        assert_eq!(requirements["Unknown"].version, VersionConstraint::Latest);
    }

    #[test]
    fn test_resolves_transitive_closure_to_newest_matches() {
        let catalog = catalog(vec![
            release("Display", "2.0.0", &[("GFX", ">=1.1.0"), ("Wire", "")]),
            release("GFX", "1.0.0", &[]),
            release("GFX", "1.2.0", &[("BusIO", "^1")]),
            release("BusIO", "1.4.0", &[]),
            release("BusIO", "2.0.0", &[]),
            release("Wire", "1.0.0", &[]),
        ]);

        let requirements = DependencyResolver::new(&catalog)
            .resolve("Display", &VersionConstraint::Latest, true)
            .unwrap();

        let resolved: Vec<(&str, String)> = requirements
            .values()
            .map(|r| (r.name.as_str(), r.version.to_string()))
            .collect();
        assert_eq!(
            resolved,
            vec![
                ("BusIO", "1.4.0".to_string()),
                ("Display", "2.0.0".to_string()),
                ("GFX", "1.2.0".to_string()),
                ("Wire", "1.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_shared_dependency_at_same_version_is_merged() {
        let catalog = catalog(vec![
            release("App", "1.0.0", &[("Left", ""), ("Right", "")]),
            release("Left", "1.0.0", &[("Wire", "1.0.0")]),
            release("Right", "1.0.0", &[("Wire", ">=1.0.0")]),
            release("Wire", "1.0.0", &[]),
        ]);

        let requirements = DependencyResolver::new(&catalog)
            .resolve("App", &VersionConstraint::Latest, true)
            .unwrap();
        assert_eq!(requirements.len(), 4);
        assert_eq!(requirements["Wire"].version, exact("1.0.0"));
    }

    #[test]
    fn test_conflicting_paths_fail() {
        let catalog = catalog(vec![
            release("App", "1.0.0", &[("Left", ""), ("Right", "")]),
            release("Left", "1.0.0", &[("Wire", "1.0.0")]),
            release("Right", "1.0.0", &[("Wire", "2.0.0")]),
            release("Wire", "1.0.0", &[]),
            release("Wire", "2.0.0", &[]),
        ]);

        let err = DependencyResolver::new(&catalog)
            .resolve("App", &VersionConstraint::Latest, true)
            .unwrap_err();

        match &err {
            LibraryError::DependencyConflict {
                library,
                required,
                conflicting,
            } => {
                assert_eq!(library, "Wire");
                assert_eq!(required.to_string(), "1.0.0");
                assert_eq!(conflicting.to_string(), "2.0.0");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_state_unchanged());
    }

    #[test]
    fn test_missing_dependency_is_not_found() {
        let catalog = catalog(vec![release("App", "1.0.0", &[("Ghost", "")])]);
        let err = DependencyResolver::new(&catalog)
            .resolve("App", &VersionConstraint::Latest, true)
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { ref library, .. } if library == "Ghost"));
    }

    #[test]
    fn test_missing_root_version_is_not_found() {
        let catalog = catalog(vec![release("App", "1.0.0", &[])]);
        let err = DependencyResolver::new(&catalog)
            .resolve("App", &exact("3.0.0"), true)
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }

    #[test]
    fn test_dependency_cycle_terminates() {
        let catalog = catalog(vec![
            release("Ping", "1.0.0", &[("Pong", "")]),
            release("Pong", "1.0.0", &[("Ping", "1.0.0")]),
        ]);
        let requirements = DependencyResolver::new(&catalog)
            .resolve("Ping", &VersionConstraint::Latest, true)
            .unwrap();
        assert_eq!(requirements.len(), 2);
    }
}
