//! HTTP transport for library archives, with retry logic and error classification.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{MAX_RETRIES, NonRetryableError, check_retryable, classify, retry_delay};
