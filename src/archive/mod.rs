//! Archive extraction for library resources.
//!
//! Library archives usually wrap their content in one top-level directory
//! (`Servo-1.2.0/...`). Extractors unpack into a scratch directory next to
//! the destination and then move that directory's content into place, so
//! the destination ends up holding the library files directly.

mod tar_gz;
mod zip;

use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use log::debug;
use std::path::{Path, PathBuf};

pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

/// Trait for format-specific archive extractors
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor: Send + Sync {
    /// Check if this extractor can handle the given archive format
    fn can_handle(&self, archive_path: &Path) -> bool;

    /// Extract the archive content into `extract_to`, which must exist.
    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()>;
}

/// Dispatcher that selects the appropriate extractor based on archive format.
pub struct ArchiveExtractorImpl {
    tar_gz: TarGzExtractor,
    zip: ZipExtractor,
}

impl Default for ArchiveExtractorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExtractorImpl {
    pub fn new() -> Self {
        Self {
            tar_gz: TarGzExtractor,
            zip: ZipExtractor,
        }
    }
}

impl ArchiveExtractor for ArchiveExtractorImpl {
    fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar_gz.can_handle(archive_path) || self.zip.can_handle(archive_path)
    }

    #[tracing::instrument(skip(self, runtime, archive_path, extract_to))]
    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        if self.tar_gz.can_handle(archive_path) {
            return self.tar_gz.extract(runtime, archive_path, extract_to);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.extract(runtime, archive_path, extract_to);
        }
        Err(anyhow!(
            "Unsupported archive format: {}",
            archive_path.display()
        ))
    }
}

/// Scratch directory used while unpacking into `extract_to`.
pub(crate) fn scratch_dir_for(extract_to: &Path) -> Result<PathBuf> {
    let name = extract_to
        .file_name()
        .ok_or_else(|| anyhow!("Invalid extraction target {:?}", extract_to))?;
    Ok(extract_to.with_file_name(format!("{}_temp_extract", name.to_string_lossy())))
}

/// Creates an empty scratch directory, removing leftovers of an earlier run.
pub(crate) fn prepare_scratch_dir<R: Runtime>(runtime: &R, scratch: &Path) -> Result<()> {
    if runtime.exists(scratch) {
        runtime.remove_dir_all(scratch)?;
    }
    runtime.create_dir_all(scratch)
}

/// Moves the unpacked content of `scratch` into `extract_to` and removes
/// `scratch`. A single top-level directory is flattened away.
pub(crate) fn promote_scratch_dir<R: Runtime>(
    runtime: &R,
    scratch: &Path,
    extract_to: &Path,
) -> Result<()> {
    let entries = runtime
        .read_dir(scratch)
        .context("Failed to read temp extraction directory")?;

    let Some(first) = entries.first() else {
        runtime.remove_dir_all(scratch)?;
        return Err(anyhow!("Archive appears to be empty."));
    };

    let source_dir = if entries.len() == 1 && runtime.is_dir(first) {
        first.clone()
    } else {
        scratch.to_path_buf()
    };

    debug!("Moving contents from {:?} to {:?}", source_dir, extract_to);
    for item in runtime.read_dir(&source_dir)? {
        let Some(file_name) = item.file_name() else {
            continue;
        };
        runtime.rename(&item, &extract_to.join(file_name))?;
    }

    runtime.remove_dir_all(scratch)
}
