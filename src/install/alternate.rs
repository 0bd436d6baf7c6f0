//! Installing a single library from a local zip archive or a git
//! repository, outside the catalog. No dependency resolution happens here.

use anyhow::{Context, Result, anyhow};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::FetchOptions;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::archive::ArchiveExtractor;
use crate::catalog::ReleaseId;
use crate::error::LibraryError;
use crate::registry::{
    InstallLocation, InstallationRegistry, InstalledLibrary, LibraryProperties, PROPERTIES_FILE,
    library_dir_name,
};
use crate::runtime::Runtime;

use super::store::LibraryStore;

/// Fetches a repository checkout into a directory.
#[cfg_attr(test, mockall::automock)]
pub trait GitFetcher: Send + Sync {
    /// Clones `url` into `dest`, checking out `reference` when given.
    fn fetch(&self, url: &str, reference: Option<String>, dest: &Path) -> Result<()>;
}

/// [`GitFetcher`] backed by libgit2.
pub struct Git2Fetcher;

impl GitFetcher for Git2Fetcher {
    #[tracing::instrument(skip(self, dest))]
    fn fetch(&self, url: &str, reference: Option<String>, dest: &Path) -> Result<()> {
        let mut fetch_options = FetchOptions::new();
        let is_local = url.starts_with("file://") || Path::new(url).is_absolute();
        if reference.is_none() && !is_local {
            fetch_options.depth(1);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        let repo = builder
            .clone(url, dest)
            .with_context(|| format!("Failed to clone {}", url))?;

        if let Some(reference) = reference {
            let object = repo
                .revparse_single(&reference)
                .or_else(|_| repo.revparse_single(&format!("origin/{}", reference)))
                .with_context(|| format!("Reference '{}' not found in {}", reference, url))?;
            let commit = object
                .peel_to_commit()
                .with_context(|| format!("'{}' does not point to a commit", reference))?;
            repo.set_head_detached(commit.id())?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))
                .with_context(|| format!("Failed to check out '{}'", reference))?;
            debug!("Checked out {} at {}", reference, commit.id());
        }
        Ok(())
    }
}

/// A git URL split into the clone URL, an optional `#ref` and the
/// repository name.
#[derive(Debug, Clone, PartialEq)]
pub struct GitSource {
    pub url: String,
    pub reference: Option<String>,
    pub name: String,
}

impl GitSource {
    pub fn parse(locator: &str) -> Result<Self, LibraryError> {
        let (url, reference) = match locator.split_once('#') {
            Some((url, reference)) if !reference.is_empty() => (url, Some(reference.to_string())),
            Some((url, _)) => (url, None),
            None => (locator, None),
        };
        let name = url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .map(|segment| segment.trim_end_matches(".git"))
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                LibraryError::InvalidRequest(format!("cannot derive a library name from '{}'", locator))
            })?;
        Ok(Self {
            url: url.to_string(),
            reference,
            name: name.to_string(),
        })
    }
}

/// Installs libraries from local zip archives into the user location.
pub struct ZipLibraryInstaller<'a, R: Runtime, E: ArchiveExtractor, S: LibraryStore> {
    runtime: &'a R,
    extractor: &'a E,
    store: &'a S,
}

impl<'a, R: Runtime + 'static, E: ArchiveExtractor, S: LibraryStore> ZipLibraryInstaller<'a, R, E, S> {
    pub fn new(runtime: &'a R, extractor: &'a E, store: &'a S) -> Self {
        Self {
            runtime,
            extractor,
            store,
        }
    }

    #[tracing::instrument(skip(self, registry, user_root))]
    pub fn install(
        &self,
        archive: &Path,
        overwrite: bool,
        registry: &mut InstallationRegistry,
        user_root: &Path,
    ) -> Result<InstalledLibrary, LibraryError> {
        if !self.runtime.exists(archive) {
            return Err(LibraryError::InvalidRequest(format!(
                "archive {:?} does not exist",
                archive
            )));
        }
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());
        let staging = user_root.join(format!(".{}.zip-staging", stem));

        let prepared = prepare_staging(self.runtime, &staging).and_then(|_| {
            self.extractor
                .extract(self.runtime, archive, &staging)
                .with_context(|| format!("Failed to extract {:?}", archive))
        });
        if let Err(source) = prepared {
            discard_staging(self.runtime, &staging);
            return Err(LibraryError::Install {
                library: archive.display().to_string(),
                source,
            });
        }

        place_library(self.runtime, self.store, &staging, overwrite, registry, user_root)
    }
}

/// Installs libraries from git repositories into the user location.
pub struct GitLibraryInstaller<'a, R: Runtime, G: GitFetcher, S: LibraryStore> {
    runtime: &'a R,
    fetcher: &'a G,
    store: &'a S,
}

impl<'a, R: Runtime, G: GitFetcher, S: LibraryStore> GitLibraryInstaller<'a, R, G, S> {
    pub fn new(runtime: &'a R, fetcher: &'a G, store: &'a S) -> Self {
        Self {
            runtime,
            fetcher,
            store,
        }
    }

    #[tracing::instrument(skip(self, registry, user_root))]
    pub fn install(
        &self,
        locator: &str,
        overwrite: bool,
        registry: &mut InstallationRegistry,
        user_root: &Path,
    ) -> Result<InstalledLibrary, LibraryError> {
        let source = GitSource::parse(locator)?;

        // Reject before cloning anything when the name alone already collides
        let target = user_root.join(library_dir_name(&source.name));
        if !overwrite
            && (registry.find(&source.name, InstallLocation::User).is_some()
                || self.runtime.exists(&target))
        {
            return Err(LibraryError::AlreadyInstalled {
                library: source.name,
                path: target,
            });
        }

        let staging = user_root.join(format!(".{}.git-staging", library_dir_name(&source.name)));
        info!("Cloning {}...", source.url);
        let fetched = clear_path(self.runtime, &staging)
            .and_then(|_| {
                self.fetcher
                    .fetch(&source.url, source.reference.clone(), &staging)
            })
            .and_then(|_| {
                clear_path(self.runtime, &staging.join(".git"))
            });
        if let Err(e) = fetched {
            discard_staging(self.runtime, &staging);
            return Err(LibraryError::Install {
                library: source.name,
                source: e,
            });
        }

        place_library(self.runtime, self.store, &staging, overwrite, registry, user_root)
    }
}

fn clear_path<R: Runtime>(runtime: &R, path: &Path) -> Result<()> {
    if runtime.exists(path) {
        runtime.remove_dir_all(path)?;
    }
    Ok(())
}

fn prepare_staging<R: Runtime>(runtime: &R, staging: &Path) -> Result<()> {
    clear_path(runtime, staging)?;
    runtime.create_dir_all(staging)
}

fn discard_staging<R: Runtime>(runtime: &R, staging: &Path) {
    if runtime.exists(staging)
        && let Err(e) = runtime.remove_dir_all(staging)
    {
        warn!("Failed to remove staging directory {:?}: {}", staging, e);
    }
}

/// Moves a prepared library directory into the user location, replacing a
/// library of the same name only when `overwrite` is set.
fn place_library<R: Runtime, S: LibraryStore>(
    runtime: &R,
    store: &S,
    staging: &Path,
    overwrite: bool,
    registry: &mut InstallationRegistry,
    user_root: &Path,
) -> Result<InstalledLibrary, LibraryError> {
    let placed = place_library_inner(runtime, store, staging, overwrite, registry, user_root);
    if placed.is_err() {
        discard_staging(runtime, staging);
    }
    placed
}

fn place_library_inner<R: Runtime, S: LibraryStore>(
    runtime: &R,
    store: &S,
    staging: &Path,
    overwrite: bool,
    registry: &mut InstallationRegistry,
    user_root: &Path,
) -> Result<InstalledLibrary, LibraryError> {
    let properties = read_properties(runtime, staging).map_err(|source| LibraryError::Install {
        library: staging.display().to_string(),
        source,
    })?;
    let target: PathBuf = user_root.join(library_dir_name(&properties.name));
    let existing = registry.find(&properties.name, InstallLocation::User).cloned();

    let occupied = runtime.exists(&target);
    if !overwrite && (existing.is_some() || occupied) {
        return Err(LibraryError::AlreadyInstalled {
            library: properties.name,
            path: target,
        });
    }
    // Only the replaced library's own directory may be cleared for the new one
    if occupied && !existing.as_ref().is_some_and(|old| old.install_dir == target) {
        return Err(LibraryError::DestinationOccupied {
            release: ReleaseId::new(properties.name, properties.version),
            path: target,
        });
    }

    if let Some(old) = &existing {
        info!("Replacing {}", old);
        store
            .uninstall(old)
            .map_err(|source| LibraryError::Uninstall {
                library: old.id(),
                source,
            })?;
        registry.remove(old);
    }

    store
        .install_dir(staging, &target)
        .map_err(|source| LibraryError::Install {
            library: properties.name.clone(),
            source,
        })?;

    let library = InstalledLibrary {
        name: properties.name,
        version: properties.version,
        install_dir: target,
        location: InstallLocation::User,
    };
    info!("Installed {} into {:?}", library, library.install_dir);
    registry.record(library.clone(), None);
    Ok(library)
}

fn read_properties<R: Runtime>(runtime: &R, dir: &Path) -> Result<LibraryProperties> {
    let path = dir.join(PROPERTIES_FILE);
    if !runtime.exists(&path) {
        return Err(anyhow!("not a library: {} is missing", PROPERTIES_FILE));
    }
    let content = runtime.read_to_string(&path)?;
    LibraryProperties::parse(&content).with_context(|| format!("Invalid {:?}", path))
}
