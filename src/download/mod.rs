//! Fetching release archives into the shared downloads directory.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{LibraryRelease, Resource};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::runtime::Runtime;

/// Fetches the archive of a release and returns its local path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(
        &self,
        release: &LibraryRelease,
        downloads_dir: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<PathBuf>;
}

/// Downloads over HTTP, writing to `<file>.part` and renaming once the
/// size and checksum check out. An archive already present with the right
/// size and checksum is reused.
pub struct HttpDownloader<R: Runtime> {
    runtime: Arc<R>,
    http_client: HttpClient,
}

impl<R: Runtime> HttpDownloader<R> {
    pub fn new(runtime: Arc<R>, http_client: HttpClient) -> Self {
        Self {
            runtime,
            http_client,
        }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Downloader for HttpDownloader<R> {
    #[tracing::instrument(skip(self, release, downloads_dir, progress), fields(release = %release))]
    async fn download(
        &self,
        release: &LibraryRelease,
        downloads_dir: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<PathBuf> {
        let runtime = self.runtime.as_ref();
        let resource = &release.resource;
        let file_name = archive_file_name(resource)?;
        let dest = downloads_dir.join(&file_name);
        let id = release.id();

        if runtime.exists(&dest) && is_cached(runtime, &dest, resource) {
            debug!("Using cached archive {:?}", dest);
            progress.emit(ProgressEvent::DownloadFinished {
                release: id,
                cached: true,
            });
            return Ok(dest);
        }

        info!("Downloading {} from {}...", release, resource.url);
        progress.emit(ProgressEvent::DownloadStarted {
            release: id.clone(),
            url: resource.url.clone(),
            total: resource.size,
        });

        let part = downloads_dir.join(format!("{}.part", file_name));
        let fetched = self
            .http_client
            .download_file(
                &resource.url,
                || {
                    runtime
                        .create_file(&part)
                        .with_context(|| format!("Failed to create temporary file at {:?}", part))
                },
                |downloaded, total| {
                    progress.emit(ProgressEvent::Downloading {
                        release: id.clone(),
                        downloaded,
                        total: if total == 0 { resource.size } else { total },
                    })
                },
            )
            .await
            .and_then(|_| verify(runtime, &part, resource));

        if let Err(e) = fetched {
            if runtime.exists(&part)
                && let Err(cleanup) = runtime.remove_file(&part)
            {
                warn!("Failed to remove partial download {:?}: {}", part, cleanup);
            }
            return Err(e);
        }

        runtime
            .rename(&part, &dest)
            .with_context(|| format!("Failed to move download into {:?}", dest))?;

        progress.emit(ProgressEvent::DownloadFinished {
            release: id,
            cached: false,
        });
        info!("Download complete.");
        Ok(dest)
    }
}

fn archive_file_name(resource: &Resource) -> Result<String> {
    let name = if resource.archive_file_name.is_empty() {
        resource
            .url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    } else {
        resource.archive_file_name.clone()
    };
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        bail!("Invalid archive file name '{}'", name);
    }
    Ok(name)
}

fn is_cached<R: Runtime>(runtime: &R, path: &Path, resource: &Resource) -> bool {
    if resource.size == 0 && resource.checksum.is_empty() {
        return false;
    }
    match verify(runtime, path, resource) {
        Ok(()) => true,
        Err(e) => {
            debug!("Cached archive {:?} is stale: {}", path, e);
            false
        }
    }
}

/// Checks the size and `SHA-256:` checksum of a downloaded archive.
fn verify<R: Runtime>(runtime: &R, path: &Path, resource: &Resource) -> Result<()> {
    if resource.size > 0 {
        let actual = runtime.file_size(path)?;
        if actual != resource.size {
            bail!(
                "Size mismatch for {:?}: expected {} bytes, got {}",
                path,
                resource.size,
                actual
            );
        }
    }

    let Some((algorithm, expected)) = resource.checksum.split_once(':') else {
        if !resource.checksum.is_empty() {
            warn!("Ignoring malformed checksum '{}'", resource.checksum);
        }
        return Ok(());
    };
    if !algorithm.eq_ignore_ascii_case("SHA-256") {
        warn!("Unsupported checksum algorithm {}, skipping verification", algorithm);
        return Ok(());
    }

    let mut reader = runtime.open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to read {:?} for checksum", path))?;
    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(anyhow!(
            "Checksum mismatch for {:?}: expected {}, got {}",
            path,
            expected,
            actual
        ));
    }
    Ok(())
}
