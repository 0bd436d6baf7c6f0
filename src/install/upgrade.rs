//! Upgrading installed user libraries to their newest catalog release.

use log::{debug, info};
use std::sync::Arc;

use crate::catalog::{ReleaseId, VersionConstraint};
use crate::download::Downloader;
use crate::error::LibraryError;
use crate::progress::ProgressSink;
use crate::registry::InstallLocation;
use crate::runtime::Runtime;
use crate::state::Session;

use super::store::LibraryStore;
use super::{LibraryInstallRequest, library_install};

/// Upgrades user libraries to their newest catalog release.
///
/// With an empty `names` every user library is considered. Libraries the
/// catalog does not know are left alone. Returns every release installed
/// along the way, dependencies included.
#[tracing::instrument(skip(session, downloader, store, progress))]
pub async fn library_upgrade<R, D, S>(
    session: &Session<R>,
    downloader: &D,
    store: &S,
    names: &[String],
    progress: Arc<dyn ProgressSink>,
) -> Result<Vec<ReleaseId>, LibraryError>
where
    R: Runtime,
    D: Downloader,
    S: LibraryStore,
{
    let upgrades = {
        let explorer = session.manager().explorer().await;
        for name in names {
            if explorer.registry.find(name, InstallLocation::User).is_none() {
                return Err(LibraryError::InvalidRequest(format!(
                    "library {} is not installed",
                    name
                )));
            }
        }

        let mut upgrades = Vec::new();
        for library in explorer.registry.in_location(InstallLocation::User) {
            if !names.is_empty() && !names.contains(&library.name) {
                continue;
            }
            match explorer.catalog.latest(&library.name) {
                Some(latest) if latest.version > library.version => {
                    upgrades.push(latest.id());
                }
                Some(_) => debug!("{} is up to date", library),
                None => debug!("{} is not in the catalog, skipping", library),
            }
        }
        upgrades
    };

    if upgrades.is_empty() {
        info!("All libraries are up to date");
        return Ok(Vec::new());
    }

    let mut installed = Vec::new();
    for target in upgrades {
        info!("Upgrading {}", target);
        let request = LibraryInstallRequest {
            name: target.name.clone(),
            version: VersionConstraint::Exact(target.version.clone()),
            no_deps: false,
            no_overwrite: false,
            location: InstallLocation::User,
        };
        let done = library_install(session, downloader, store, &request, Arc::clone(&progress)).await?;
        installed.extend(done);
    }
    Ok(installed)
}
