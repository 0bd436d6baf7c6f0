//! Carrying out install plans.

use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

use crate::catalog::ReleaseId;
use crate::download::Downloader;
use crate::error::LibraryError;
use crate::progress::{InstallReason, ProgressEvent, ProgressSink, ReasonKind};
use crate::registry::{InstallLocation, InstallationRegistry, InstalledLibrary};

use super::planner::{InstallPlan, InstallPlans};
use super::store::LibraryStore;

/// Downloads, uninstalls and installs planned releases, keeping the
/// registry in step with the disk.
pub struct InstallationExecutor<'a, D: Downloader, S: LibraryStore> {
    downloader: &'a D,
    store: &'a S,
}

impl<'a, D: Downloader, S: LibraryStore> InstallationExecutor<'a, D, S> {
    pub fn new(downloader: &'a D, store: &'a S) -> Self {
        Self { downloader, store }
    }

    /// Executes `plans` in name order. Stops at the first failing entry;
    /// entries finished before it stay installed and recorded.
    ///
    /// `root` names the originally requested library, which decides the
    /// reason reported for each install.
    #[tracing::instrument(skip(self, plans, registry, progress))]
    pub async fn execute(
        &self,
        plans: InstallPlans,
        root: &str,
        registry: &mut InstallationRegistry,
        downloads_dir: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Vec<ReleaseId>, LibraryError> {
        let mut installed = Vec::new();
        for (id, plan) in plans {
            if plan.up_to_date {
                debug!("{} is already installed", id);
                progress.emit(ProgressEvent::Skipped { release: id });
                continue;
            }
            let reason = install_reason(&plan, root);
            self.execute_one(&id, plan, reason, registry, downloads_dir, &progress)
                .await?;
            installed.push(id);
        }
        Ok(installed)
    }

    async fn execute_one(
        &self,
        id: &ReleaseId,
        plan: InstallPlan,
        reason: InstallReason,
        registry: &mut InstallationRegistry,
        downloads_dir: &Path,
        progress: &Arc<dyn ProgressSink>,
    ) -> Result<(), LibraryError> {
        let archive = self
            .downloader
            .download(&plan.release, downloads_dir, Arc::clone(progress))
            .await
            .map_err(|source| LibraryError::Download {
                release: id.clone(),
                source,
            })?;

        progress.emit(ProgressEvent::InstallStarted {
            release: id.clone(),
        });
        info!("Installing {} ({})", id, reason);

        if let Some(old) = &plan.replaces {
            progress.emit(ProgressEvent::Replacing {
                release: id.clone(),
                replaced: old.id(),
            });
            info!("Replacing {} with {}", old, id);
            self.store
                .uninstall(old)
                .map_err(|source| LibraryError::Uninstall {
                    library: old.id(),
                    source,
                })?;
            // The old directory is gone; drop its entry even if the install fails
            registry.remove(old);
        }

        self.store
            .install_archive(&archive, &plan.target_path)
            .map_err(|source| LibraryError::Install {
                library: id.to_string(),
                source,
            })?;

        registry.record(
            InstalledLibrary {
                name: plan.release.name.clone(),
                version: plan.release.version.clone(),
                install_dir: plan.target_path.clone(),
                location: plan.location,
            },
            None,
        );

        info!("Installed {} into {:?}", id, plan.target_path);
        progress.emit(ProgressEvent::Installed {
            release: id.clone(),
            reason,
        });
        Ok(())
    }
}

fn install_reason(plan: &InstallPlan, root: &str) -> InstallReason {
    let builtin = plan.location == InstallLocation::IdeBuiltin;
    if plan.release.name != root {
        return InstallReason::new(ReasonKind::Depends, builtin);
    }
    let kind = if plan.replaces.is_some() {
        ReasonKind::Upgrade
    } else {
        ReasonKind::Install
    };
    InstallReason::new(kind, builtin)
}
