//! Diffing resolved requirements against the installed set.

use log::debug;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::catalog::{LibraryCatalog, LibraryRelease, ReleaseId};
use crate::error::LibraryError;
use crate::registry::{
    InstallLocation, InstallationRegistry, InstalledLibrary, LocationRoots, library_dir_name,
};
use crate::runtime::Runtime;

use super::resolver::Requirements;

/// What to do for one resolved release.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallPlan {
    pub release: LibraryRelease,
    pub location: InstallLocation,
    pub up_to_date: bool,
    /// Installed library of the same name but a different version
    pub replaces: Option<InstalledLibrary>,
    pub target_path: PathBuf,
}

/// Plans keyed by release identity; iteration order is name, then version.
pub type InstallPlans = BTreeMap<ReleaseId, InstallPlan>;

pub struct InstallPlanner<'a, R: Runtime> {
    runtime: &'a R,
    catalog: &'a LibraryCatalog,
    registry: &'a InstallationRegistry,
    roots: &'a LocationRoots,
}

impl<'a, R: Runtime> InstallPlanner<'a, R> {
    pub fn new(
        runtime: &'a R,
        catalog: &'a LibraryCatalog,
        registry: &'a InstallationRegistry,
        roots: &'a LocationRoots,
    ) -> Self {
        Self {
            runtime,
            catalog,
            registry,
            roots,
        }
    }

    /// Classifies every requirement as up to date, fresh install or
    /// replacement. With `no_overwrite`, any replacement rejects the whole
    /// batch. A target directory that exists but does not belong to the
    /// replaced library also rejects the batch. Only reads the filesystem.
    #[tracing::instrument(skip(self, requirements))]
    pub fn plan(
        &self,
        requirements: &Requirements,
        location: InstallLocation,
        no_overwrite: bool,
    ) -> Result<InstallPlans, LibraryError> {
        let root = self.roots.root(location).ok_or_else(|| {
            LibraryError::InvalidRequest(format!("no directory configured for {} libraries", location))
        })?;

        let mut plans = InstallPlans::new();
        for requirement in requirements.values() {
            let release = self
                .catalog
                .find_release(&requirement.name, &requirement.version)?;
            let installed = self.registry.find(&release.name, location);

            let up_to_date = installed.is_some_and(|lib| lib.version == release.version);
            let replaces = installed.filter(|lib| lib.version != release.version).cloned();

            if let Some(existing) = &replaces
                && no_overwrite
            {
                return Err(LibraryError::OverwriteConflict {
                    release: release.id(),
                    installed: existing.id(),
                });
            }

            debug!(
                "Planned {}: up_to_date={}, replaces={:?}",
                release,
                up_to_date,
                replaces.as_ref().map(|lib| lib.version.to_string())
            );
            plans.insert(
                release.id(),
                InstallPlan {
                    release: release.clone(),
                    location,
                    up_to_date,
                    replaces,
                    target_path: root.join(library_dir_name(&release.name)),
                },
            );
        }

        for (id, plan) in &plans {
            self.check_destination(id, plan)?;
        }
        Ok(plans)
    }

    /// The target must be vacant, or be the directory of the library the
    /// plan replaces (it is uninstalled first).
    fn check_destination(&self, id: &ReleaseId, plan: &InstallPlan) -> Result<(), LibraryError> {
        if plan.up_to_date || !self.runtime.exists(&plan.target_path) {
            return Ok(());
        }
        let owned_by_replaced = plan
            .replaces
            .as_ref()
            .is_some_and(|old| old.install_dir == plan.target_path);
        if owned_by_replaced {
            return Ok(());
        }
        Err(LibraryError::DestinationOccupied {
            release: id.clone(),
            path: plan.target_path.clone(),
        })
    }
}
