use crate::runtime::Runtime;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::path::Path;
use tar::Archive;

use super::{ArchiveExtractor, prepare_scratch_dir, promote_scratch_dir, scratch_dir_for};

/// Extractor for .tar.gz / .tgz archives
pub struct TarGzExtractor;

impl ArchiveExtractor for TarGzExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting tar.gz archive to {:?}...", extract_to);
        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        let mut archive = Archive::new(GzDecoder::new(file));

        let scratch = scratch_dir_for(extract_to)?;
        prepare_scratch_dir(runtime, &scratch)?;
        debug!("Unpacking to temp dir: {:?}", scratch);

        let entries = archive
            .entries()
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
        for entry in entries {
            let mut entry = entry.context("Failed to read tar entry")?;
            let entry_path = entry.path().context("Invalid tar entry path")?.into_owned();
            if entry_path.is_absolute()
                || entry_path
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                debug!("Skipping entry with unsafe path {:?}", entry_path);
                continue;
            }

            let full_path = scratch.join(&entry_path);
            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                runtime.create_dir_all(&full_path)?;
            } else if entry_type.is_file() {
                if let Some(parent) = full_path.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest_file = runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest_file)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode()
                    && let Err(e) = runtime.set_permissions(&full_path, mode)
                {
                    debug!("Failed to set permissions on {:?}: {}", full_path, e);
                }
            } else {
                debug!("Skipping non-regular entry {:?}", entry_path);
            }
        }

        promote_scratch_dir(runtime, &scratch, extract_to)
    }
}
