//! Library installation: resolution, planning and execution behind the
//! session's leases, plus the zip and git installers.
//!
//! A catalog install walks:
//!
//! 1. [`resolver::DependencyResolver`] under an explorer lease
//! 2. [`planner::InstallPlanner`] under the installer lease; any error here,
//!    including an occupied target directory, leaves the disk untouched
//! 3. [`executor::InstallationExecutor`], still under the installer lease
//! 4. a registry rescan on the session, run whether or not step 3 failed

pub mod alternate;
pub mod executor;
pub mod planner;
pub mod resolver;
pub mod store;
mod upgrade;

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::ArchiveExtractor;
use crate::catalog::{ReleaseId, VersionConstraint};
use crate::download::Downloader;
use crate::error::LibraryError;
use crate::progress::{InstallReason, ProgressEvent, ProgressSink, ReasonKind};
use crate::registry::{InstallLocation, InstalledLibrary};
use crate::runtime::Runtime;
use crate::state::{InstallerLease, Session};

use alternate::{GitFetcher, GitLibraryInstaller, ZipLibraryInstaller};
use executor::InstallationExecutor;
use planner::InstallPlanner;
use resolver::DependencyResolver;
use store::LibraryStore;

pub use upgrade::library_upgrade;

/// Install a catalog library and, unless `no_deps`, its dependencies.
#[derive(Debug, Clone, Default)]
pub struct LibraryInstallRequest {
    pub name: String,
    pub version: VersionConstraint,
    pub no_deps: bool,
    /// Fail the whole request if any library would replace a different
    /// installed version
    pub no_overwrite: bool,
    pub location: InstallLocation,
}

/// Install the library packed in a local zip archive.
#[derive(Debug, Clone)]
pub struct ZipLibraryInstallRequest {
    pub path: PathBuf,
    pub overwrite: bool,
}

/// Install the library at a git URL, optionally suffixed with `#<ref>`.
#[derive(Debug, Clone)]
pub struct GitLibraryInstallRequest {
    pub url: String,
    pub overwrite: bool,
}

/// Installs `request.name` from the catalog. Returns the releases that
/// were actually installed; up-to-date ones are reported as skipped.
#[tracing::instrument(skip(session, downloader, store, progress))]
pub async fn library_install<R, D, S>(
    session: &Session<R>,
    downloader: &D,
    store: &S,
    request: &LibraryInstallRequest,
    progress: Arc<dyn ProgressSink>,
) -> Result<Vec<ReleaseId>, LibraryError>
where
    R: Runtime,
    D: Downloader,
    S: LibraryStore,
{
    if request.name.trim().is_empty() {
        return Err(LibraryError::InvalidRequest("library name is empty".into()));
    }

    let requirements = {
        let explorer = session.manager().explorer().await;
        DependencyResolver::new(&explorer.catalog).resolve(
            &request.name,
            &request.version,
            !request.no_deps,
        )?
    };

    let mut lease = session.manager().installer().await;
    let plans = InstallPlanner::new(
        session.runtime().as_ref(),
        &lease.catalog,
        &lease.registry,
        &lease.roots,
    )
    .plan(&requirements, request.location, request.no_overwrite)?;

    info!(
        "Installing {} ({} libraries planned)",
        request.name,
        plans.len()
    );
    let outcome = InstallationExecutor::new(downloader, store)
        .execute(
            plans,
            &request.name,
            &mut lease.registry,
            session.downloads_dir(),
            progress,
        )
        .await;

    commit(session, &mut lease, outcome)
}

/// Installs a library from a local zip archive into the user location.
#[tracing::instrument(skip(session, extractor, store, progress))]
pub async fn zip_library_install<R, E, S>(
    session: &Session<R>,
    extractor: &E,
    store: &S,
    request: &ZipLibraryInstallRequest,
    progress: Arc<dyn ProgressSink>,
) -> Result<InstalledLibrary, LibraryError>
where
    R: Runtime + 'static,
    E: ArchiveExtractor,
    S: LibraryStore,
{
    let mut lease = session.manager().installer().await;
    let user_root = lease.roots.user.clone();
    let outcome = ZipLibraryInstaller::new(session.runtime().as_ref(), extractor, store).install(
        &request.path,
        request.overwrite,
        &mut lease.registry,
        &user_root,
    );
    let library = commit(session, &mut lease, outcome)?;
    report_installed(&library, progress.as_ref());
    Ok(library)
}

/// Installs a library from a git repository into the user location.
#[tracing::instrument(skip(session, fetcher, store, progress))]
pub async fn git_library_install<R, G, S>(
    session: &Session<R>,
    fetcher: &G,
    store: &S,
    request: &GitLibraryInstallRequest,
    progress: Arc<dyn ProgressSink>,
) -> Result<InstalledLibrary, LibraryError>
where
    R: Runtime,
    G: GitFetcher,
    S: LibraryStore,
{
    let mut lease = session.manager().installer().await;
    let user_root = lease.roots.user.clone();
    let outcome = GitLibraryInstaller::new(session.runtime().as_ref(), fetcher, store).install(
        &request.url,
        request.overwrite,
        &mut lease.registry,
        &user_root,
    );
    let library = commit(session, &mut lease, outcome)?;
    report_installed(&library, progress.as_ref());
    Ok(library)
}

/// Reloads the installed set, then hands back the install outcome. An
/// install error wins over a reload error.
fn commit<R: Runtime, T>(
    session: &Session<R>,
    lease: &mut InstallerLease,
    outcome: Result<T, LibraryError>,
) -> Result<T, LibraryError> {
    let reloaded = session.reinitialize(lease);
    match (outcome, reloaded) {
        (Err(e), Err(reload)) => {
            warn!("Failed to reload installed libraries: {}", reload);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(reload)) => Err(reload),
        (Ok(value), Ok(())) => Ok(value),
    }
}

fn report_installed(library: &InstalledLibrary, progress: &dyn ProgressSink) {
    progress.emit(ProgressEvent::Installed {
        release: library.id(),
        reason: InstallReason::new(ReasonKind::Install, false),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LibraryCatalog, Version};
    use crate::download::MockDownloader;
    use crate::progress::NullSink;
    use crate::registry::{InstallationRegistry, library_dir_name};
    use crate::runtime::MockRuntime;
    use crate::state::LibraryState;
    use crate::test_utils::{RecordingSink, catalog, installed, release, roots};
    use store::MockLibraryStore;

    /// Runtime whose registry rescans report `libraries` as installed.
    fn runtime_reporting(libraries: Vec<(&'static str, &'static str)>) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        let user = roots().user;
        let dirs: Vec<PathBuf> = libraries
            .iter()
            .map(|(name, _)| user.join(library_dir_name(name)))
            .collect();

        let user_root = user.clone();
        runtime
            .expect_exists()
            .returning(move |path| path == user_root || path.ends_with("library.properties"));
        runtime.expect_is_dir().returning(|_| true);
        runtime
            .expect_read_dir()
            .returning(move |_| Ok(dirs.clone()));
        runtime.expect_read_to_string().returning(move |path| {
            let dir = path.parent().and_then(|p| p.file_name()).unwrap();
            let (name, version) = libraries
                .iter()
                .find(|(name, _)| library_dir_name(name) == dir.to_string_lossy())
                .unwrap();
            Ok(format!("name={}\nversion={}\n", name, version))
        });
        runtime
    }

    fn session(
        runtime: MockRuntime,
        catalog: LibraryCatalog,
        registry: InstallationRegistry,
    ) -> Session<MockRuntime> {
        Session::new(
            Arc::new(runtime),
            LibraryState::new(catalog, registry, roots()),
            PathBuf::from("/home/user/.boardpm/staging"),
        )
    }

    fn request(name: &str) -> LibraryInstallRequest {
        LibraryInstallRequest {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_install_with_dependencies_and_reinitialize() {
        // --- Setup ---
        let runtime = runtime_reporting(vec![("Display", "2.0.0"), ("Wire", "1.0.0")]);
        let session = session(
            runtime,
            catalog(vec![
                release("Display", "2.0.0", &[("Wire", "")]),
                release("Wire", "1.0.0", &[]),
            ]),
            InstallationRegistry::new(),
        );

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(2)
            .returning(|release, dir, _| Ok(dir.join(format!("{}.zip", release.name))));
        let mut store = MockLibraryStore::new();
        store.expect_install_archive().times(2).returning(|_, _| Ok(()));
        let sink = Arc::new(RecordingSink::default());

        // --- Execute ---
        let installed = library_install(&session, &downloader, &store, &request("Display"), sink.clone())
            .await
            .unwrap();

        // --- Verify ---
        let names: Vec<&str> = installed.iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["Display", "Wire"]);

        let reasons: Vec<String> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Installed { reason, .. } => Some(reason.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec!["install", "depends"]);

        let explorer = session.manager().explorer().await;
        assert_eq!(explorer.registry.len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_conflict_installs_nothing() {
        // --- Setup ---
        // Strict mocks: no filesystem, download or store access allowed
        let session = session(
            MockRuntime::new(),
            catalog(vec![
                release("App", "1.0.0", &[("Left", ""), ("Right", "")]),
                release("Left", "1.0.0", &[("Wire", "1.0.0")]),
                release("Right", "1.0.0", &[("Wire", "2.0.0")]),
                release("Wire", "1.0.0", &[]),
                release("Wire", "2.0.0", &[]),
            ]),
            InstallationRegistry::new(),
        );

        let err = library_install(
            &session,
            &MockDownloader::new(),
            &MockLibraryStore::new(),
            &request("App"),
            Arc::new(NullSink),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LibraryError::DependencyConflict { .. }));
        assert!(err.is_state_unchanged());
    }

    #[test_log::test(tokio::test)]
    async fn test_no_deps_installs_root_only() {
        let runtime = runtime_reporting(vec![("Display", "2.0.0")]);
        let session = session(
            runtime,
            catalog(vec![
                release("Display", "2.0.0", &[("Wire", "")]),
                release("Wire", "1.0.0", &[]),
            ]),
            InstallationRegistry::new(),
        );

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|release, _, _| release.name == "Display")
            .times(1)
            .returning(|_, dir, _| Ok(dir.join("Display.zip")));
        let mut store = MockLibraryStore::new();
        store.expect_install_archive().times(1).returning(|_, _| Ok(()));

        let installed = library_install(
            &session,
            &downloader,
            &store,
            &LibraryInstallRequest {
                no_deps: true,
                ..request("Display")
            },
            Arc::new(NullSink),
        )
        .await
        .unwrap();

        assert_eq!(installed.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_up_to_date_install_is_a_noop() {
        // --- Setup ---
        // Only the registry rescan may touch the runtime
        let runtime = runtime_reporting(vec![("Servo", "1.2.0")]);
        let session = session(
            runtime,
            catalog(vec![release("Servo", "1.2.0", &[])]),
            InstallationRegistry::from_libraries([installed("Servo", "1.2.0", InstallLocation::User)]),
        );
        let sink = Arc::new(RecordingSink::default());

        // --- Execute ---
        let installed = library_install(
            &session,
            &MockDownloader::new(),
            &MockLibraryStore::new(),
            &LibraryInstallRequest {
                version: VersionConstraint::Exact(Version::parse("1.2.0").unwrap()),
                ..request("Servo")
            },
            sink.clone(),
        )
        .await
        .unwrap();

        // --- Verify ---
        assert!(installed.is_empty());
        assert!(matches!(
            sink.events().as_slice(),
            [ProgressEvent::Skipped { .. }]
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_no_overwrite_rejects_batch_without_writes() {
        // --- Setup ---
        // A strict runtime fails the test on any filesystem access
        let session = session(
            MockRuntime::new(),
            catalog(vec![
                release("Display", "2.0.0", &[("Servo", "2.0.0")]),
                release("Servo", "2.0.0", &[]),
            ]),
            InstallationRegistry::from_libraries([installed("Servo", "1.0.0", InstallLocation::User)]),
        );

        // --- Execute ---
        let err = library_install(
            &session,
            &MockDownloader::new(),
            &MockLibraryStore::new(),
            &LibraryInstallRequest {
                no_overwrite: true,
                ..request("Display")
            },
            Arc::new(NullSink),
        )
        .await
        .unwrap_err();

        // --- Verify ---
        assert!(matches!(err, LibraryError::OverwriteConflict { .. }));
        let explorer = session.manager().explorer().await;
        assert_eq!(
            explorer.registry.find("Servo", InstallLocation::User).unwrap().version,
            Version::parse("1.0.0").unwrap()
        );
        assert!(explorer.registry.find("Display", InstallLocation::User).is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_partial_batch_stays_committed() {
        // --- Setup ---
        let runtime = runtime_reporting(vec![("Alpha", "1.0.0")]);
        let session = session(
            runtime,
            catalog(vec![
                release("Alpha", "1.0.0", &[("Beta", "")]),
                release("Beta", "1.0.0", &[]),
            ]),
            InstallationRegistry::new(),
        );

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|release, _, _| release.name == "Alpha")
            .returning(|_, dir, _| Ok(dir.join("Alpha.zip")));
        downloader
            .expect_download()
            .withf(|release, _, _| release.name == "Beta")
            .returning(|_, _, _| Err(anyhow::anyhow!("timed out")));
        let mut store = MockLibraryStore::new();
        store.expect_install_archive().times(1).returning(|_, _| Ok(()));

        // --- Execute ---
        let err = library_install(&session, &downloader, &store, &request("Alpha"), Arc::new(NullSink))
            .await
            .unwrap_err();

        // --- Verify ---
        assert!(matches!(err, LibraryError::Download { .. }));
        assert!(!err.is_state_unchanged());
        let explorer = session.manager().explorer().await;
        assert!(explorer.registry.find("Alpha", InstallLocation::User).is_some());
        assert!(explorer.registry.find("Beta", InstallLocation::User).is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_lease_is_released_after_failure() {
        let session = session(MockRuntime::new(), LibraryCatalog::default(), InstallationRegistry::new());

        let err = library_install(
            &session,
            &MockDownloader::new(),
            &MockLibraryStore::new(),
            &request("Missing"),
            Arc::new(NullSink),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));

        let acquired = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            session.manager().installer(),
        )
        .await;
        assert!(acquired.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_name_is_rejected() {
        let session = session(MockRuntime::new(), LibraryCatalog::default(), InstallationRegistry::new());
        let err = library_install(
            &session,
            &MockDownloader::new(),
            &MockLibraryStore::new(),
            &request("  "),
            Arc::new(NullSink),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidRequest(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_occupied_target_keeps_old_library_installed() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("libraries");
        std::fs::create_dir_all(user.join("Servo-master")).unwrap();
        std::fs::write(
            user.join("Servo-master/library.properties"),
            "name=Servo\nversion=1.0.0\n",
        )
        .unwrap();
        std::fs::create_dir_all(user.join("Servo")).unwrap();
        std::fs::write(user.join("Servo/notes.txt"), "keep me").unwrap();

        let runtime = Arc::new(crate::runtime::RealRuntime);
        let roots = crate::registry::LocationRoots {
            user: user.clone(),
            builtin: dir.path().join("builtin"),
            sketch: None,
        };
        let registry = InstallationRegistry::scan(runtime.as_ref(), &roots).unwrap();
        let session = Session::new(
            runtime,
            LibraryState::new(catalog(vec![release("Servo", "2.0.0", &[])]), registry, roots),
            dir.path().join("staging"),
        );

        // --- Execute ---
        // Strict downloader and store: nothing may be fetched or removed
        let err = library_install(
            &session,
            &MockDownloader::new(),
            &MockLibraryStore::new(),
            &request("Servo"),
            Arc::new(NullSink),
        )
        .await
        .unwrap_err();

        // --- Verify ---
        assert!(matches!(err, LibraryError::DestinationOccupied { .. }));
        assert!(err.is_state_unchanged());
        assert!(user.join("Servo-master/library.properties").exists());
        assert!(user.join("Servo/notes.txt").exists());
        let explorer = session.manager().explorer().await;
        let servo = explorer.registry.find("Servo", InstallLocation::User).unwrap();
        assert_eq!(servo.install_dir, user.join("Servo-master"));
        assert_eq!(servo.version, Version::parse("1.0.0").unwrap());
    }
}
