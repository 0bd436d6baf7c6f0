//! Filesystem primitives shared by every installer.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::ArchiveExtractor;
use crate::registry::InstalledLibrary;
use crate::runtime::Runtime;

/// Installs and removes library directories.
#[cfg_attr(test, mockall::automock)]
pub trait LibraryStore: Send + Sync {
    /// Removes an installed library from disk.
    fn uninstall(&self, library: &InstalledLibrary) -> Result<()>;

    /// Unpacks `archive` next to `target_path`, then moves it into place.
    /// Fails without touching `target_path` when it already exists.
    fn install_archive(&self, archive: &Path, target_path: &Path) -> Result<()>;

    /// Moves an already prepared directory into `target_path`.
    fn install_dir(&self, source: &Path, target_path: &Path) -> Result<()>;
}

pub struct FsLibraryStore<R: Runtime, E: ArchiveExtractor> {
    runtime: Arc<R>,
    extractor: Arc<E>,
}

impl<R: Runtime, E: ArchiveExtractor> FsLibraryStore<R, E> {
    pub fn new(runtime: Arc<R>, extractor: Arc<E>) -> Self {
        Self { runtime, extractor }
    }

    fn ensure_vacant(&self, target_path: &Path) -> Result<()> {
        if self.runtime.exists(target_path) {
            bail!("destination directory {:?} already exists", target_path);
        }
        if let Some(parent) = target_path.parent() {
            self.runtime
                .create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        Ok(())
    }
}

/// Hidden sibling of `target_path` used while unpacking.
pub fn staging_path(target_path: &Path) -> Result<PathBuf> {
    let name = target_path
        .file_name()
        .with_context(|| format!("Invalid install path {:?}", target_path))?;
    Ok(target_path.with_file_name(format!(".{}.staging", name.to_string_lossy())))
}

impl<R: Runtime + 'static, E: ArchiveExtractor> LibraryStore for FsLibraryStore<R, E> {
    #[tracing::instrument(skip(self, library), fields(library = %library))]
    fn uninstall(&self, library: &InstalledLibrary) -> Result<()> {
        let runtime = self.runtime.as_ref();
        if !runtime.exists(&library.install_dir) {
            warn!(
                "Library {} is already gone from {:?}",
                library, library.install_dir
            );
            return Ok(());
        }
        runtime
            .remove_dir_all(&library.install_dir)
            .with_context(|| format!("Failed to remove {:?}", library.install_dir))?;
        info!("Removed {} from {:?}", library, library.install_dir);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn install_archive(&self, archive: &Path, target_path: &Path) -> Result<()> {
        let runtime = self.runtime.as_ref();
        self.ensure_vacant(target_path)?;

        let staging = staging_path(target_path)?;
        if runtime.exists(&staging) {
            runtime.remove_dir_all(&staging)?;
        }
        runtime.create_dir_all(&staging)?;
        debug!("Staging {:?} in {:?}", archive, staging);

        let staged = self
            .extractor
            .extract(runtime, archive, &staging)
            .and_then(|_| {
                runtime
                    .rename(&staging, target_path)
                    .with_context(|| format!("Failed to move library into {:?}", target_path))
            });

        if let Err(e) = staged {
            if runtime.exists(&staging)
                && let Err(cleanup) = runtime.remove_dir_all(&staging)
            {
                warn!("Failed to remove staging directory {:?}: {}", staging, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn install_dir(&self, source: &Path, target_path: &Path) -> Result<()> {
        self.ensure_vacant(target_path)?;
        self.runtime
            .rename(source, target_path)
            .with_context(|| format!("Failed to move {:?} into {:?}", source, target_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveExtractorImpl, MockArchiveExtractor};
    use crate::registry::InstallLocation;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use std::fs;
    use std::io::Write;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = ::zip::ZipWriter::new(fs::File::create(path).unwrap());
        let options: ::zip::write::FileOptions<()> = ::zip::write::FileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn real_store() -> FsLibraryStore<RealRuntime, ArchiveExtractorImpl> {
        FsLibraryStore::new(Arc::new(RealRuntime), Arc::new(ArchiveExtractorImpl::new()))
    }

    #[test]
    fn test_install_archive_moves_staged_content() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Servo-1.2.0.zip");
        write_zip(
            &archive,
            &[("Servo-1.2.0/library.properties", "name=Servo\nversion=1.2.0\n")],
        );
        let target = dir.path().join("libraries").join("Servo");

        real_store().install_archive(&archive, &target).unwrap();

        assert!(target.join("library.properties").exists());
        assert!(!dir.path().join("libraries").join(".Servo.staging").exists());
    }

    #[test]
    fn test_install_archive_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Servo-1.2.0.zip");
        write_zip(&archive, &[("Servo/library.properties", "name=Servo\nversion=1.2.0\n")]);
        let target = dir.path().join("Servo");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("sketch.ino"), "keep me").unwrap();

        let err = real_store().install_archive(&archive, &target).unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(target.join("sketch.ino")).unwrap(), "keep me");
        assert!(!target.join("library.properties").exists());
    }

    #[test]
    fn test_install_archive_cleans_staging_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, "not a zip").unwrap();
        let target = dir.path().join("Broken");

        assert!(real_store().install_archive(&archive, &target).is_err());
        assert!(!target.exists());
        assert!(!dir.path().join(".Broken.staging").exists());
    }

    #[test]
    fn test_uninstall_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let install_dir = dir.path().join("Servo");
        fs::create_dir(&install_dir).unwrap();
        let library = InstalledLibrary {
            name: "Servo".into(),
            version: crate::catalog::Version::parse("1.0.0").unwrap(),
            install_dir: install_dir.clone(),
            location: InstallLocation::User,
        };

        real_store().uninstall(&library).unwrap();
        assert!(!install_dir.exists());
    }

    #[test]
    fn test_uninstall_propagates_failure() {
        // --- Setup ---
        let mut runtime = MockRuntime::new();
        let library = crate::test_utils::installed("Servo", "1.0.0", InstallLocation::User);
        let install_dir = library.install_dir.clone();

        runtime
            .expect_exists()
            .with(eq(install_dir.clone()))
            .returning(|_| true);
        runtime
            .expect_remove_dir_all()
            .with(eq(install_dir))
            .returning(|_| Err(anyhow::anyhow!("permission denied")));

        let store = FsLibraryStore::new(Arc::new(runtime), Arc::new(MockArchiveExtractor::new()));

        // --- Execute & Verify ---
        let err = store.uninstall(&library).unwrap_err();
        assert!(format!("{:#}", err).contains("permission denied"));
    }

    #[test]
    fn test_install_dir_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(".incoming");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("library.properties"), "name=X\nversion=1.0\n").unwrap();
        let target = dir.path().join("libraries").join("X");

        real_store().install_dir(&source, &target).unwrap();

        assert!(target.join("library.properties").exists());
        assert!(!source.exists());
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/libs/Servo")).unwrap(),
            PathBuf::from("/libs/.Servo.staging")
        );
    }
}
