//! HTTP client used to fetch library archives.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use std::io::Write;
use std::time::Duration;

use super::retry::{MAX_RETRIES, NonRetryableError, check_retryable, retry_delay};

/// HTTP client with built-in retry logic for archive downloads.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client with the given user agent and an optional whole-request timeout.
    pub fn build(user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Downloads `url` into the writer produced by `create_writer`.
    ///
    /// `on_progress` receives `(downloaded, total)` after every chunk; `total`
    /// is the Content-Length when the server sends one, otherwise 0.
    /// Transient failures are retried with a fresh writer.
    #[tracing::instrument(skip(self, create_writer, on_progress))]
    pub async fn download_file<W, F, P>(
        &self,
        url: &str,
        create_writer: F,
        mut on_progress: P,
    ) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: FnMut(u64, u64),
    {
        debug!("Downloading file from {}...", url);

        let mut attempt = 1;
        loop {
            match self
                .download_file_once(url, &create_writer, &mut on_progress)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    if e.downcast_ref::<NonRetryableError>().is_some() || attempt >= MAX_RETRIES {
                        return Err(e);
                    }
                    warn!(
                        "Download attempt {}/{} failed ({}), retrying...",
                        attempt, MAX_RETRIES, e
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single download attempt without retry.
    async fn download_file_once<W, F, P>(
        &self,
        url: &str,
        create_writer: &F,
        on_progress: &mut P,
    ) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: FnMut(u64, u64),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;
        let total = response.content_length().unwrap_or(0);

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;
        on_progress(downloaded_bytes, total);

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
            on_progress(downloaded_bytes, total);
        }
        writer.flush().context("Failed to flush downloaded file")?;

        debug!(
            "Downloaded {:.2} KB",
            downloaded_bytes as f64 / 1024.0
        );

        Ok(downloaded_bytes)
    }
}
