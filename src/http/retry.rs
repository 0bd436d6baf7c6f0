//! Which archive download failures are worth another attempt.
//!
//! Library archives live on static mirrors. A missing or refused archive
//! stays missing, so only server errors, throttling and network failures
//! are retried.

use reqwest::StatusCode;
use std::time::Duration;

/// Attempts per download, the first one included.
pub const MAX_RETRIES: usize = 3;

const BASE_DELAY_MS: u64 = 500;

/// Pause before attempt `attempt + 1`; grows linearly.
pub fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(BASE_DELAY_MS * attempt as u64)
}

/// A download failure that a retry cannot fix.
#[derive(Debug, thiserror::Error)]
pub enum NonRetryableError {
    #[error("archive {url} is not available on the server (HTTP {})", status.as_u16())]
    Missing { url: String, status: StatusCode },

    #[error("server refused to serve {url} (HTTP {})", status.as_u16())]
    Rejected { url: String, status: StatusCode },
}

/// Classifies the response status of a failed archive request. `None`
/// means the request may be retried.
pub fn classify(status: StatusCode, url: &str) -> Option<NonRetryableError> {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(NonRetryableError::Missing {
            url: url.to_string(),
            status,
        }),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => None,
        s if s.is_client_error() => Some(NonRetryableError::Rejected {
            url: url.to_string(),
            status,
        }),
        _ => None,
    }
}

/// Maps an `error_for_status()` failure to a [`NonRetryableError`] when
/// retrying is pointless, otherwise keeps the reqwest error.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    let url = error.url().map(|u| u.to_string()).unwrap_or_default();
    match error.status().and_then(|status| classify(status, &url)) {
        Some(non_retryable) => non_retryable.into(),
        None => error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://downloads.example.org/libraries/Servo-1.2.0.zip";

    #[test]
    fn test_missing_archive_is_final() {
        for status in [StatusCode::NOT_FOUND, StatusCode::GONE] {
            let err = classify(status, URL).unwrap();
            assert!(matches!(err, NonRetryableError::Missing { .. }));
            assert!(err.to_string().contains("Servo-1.2.0.zip"));
        }
        assert!(classify(StatusCode::NOT_FOUND, URL).unwrap().to_string().contains("HTTP 404"));
    }

    #[test]
    fn test_refused_request_is_final() {
        let err = classify(StatusCode::FORBIDDEN, URL).unwrap();
        assert!(matches!(
            err,
            NonRetryableError::Rejected {
                status: StatusCode::FORBIDDEN,
                ..
            }
        ));
    }

    #[test]
    fn test_transient_statuses_are_retried() {
        assert!(classify(StatusCode::INTERNAL_SERVER_ERROR, URL).is_none());
        assert!(classify(StatusCode::BAD_GATEWAY, URL).is_none());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, URL).is_none());
        assert!(classify(StatusCode::REQUEST_TIMEOUT, URL).is_none());
    }

    #[test]
    fn test_retry_delay_grows() {
        assert_eq!(retry_delay(1), Duration::from_millis(500));
        assert_eq!(retry_delay(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_check_retryable_keeps_url_of_missing_archive() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/Servo-1.2.0.zip")
            .with_status(404)
            .create_async()
            .await;

        let url = format!("{}/Servo-1.2.0.zip", server.url());
        let response = reqwest::Client::new().get(&url).send().await.unwrap();
        let err = check_retryable(response.error_for_status().unwrap_err());

        let non_retryable = err.downcast_ref::<NonRetryableError>().unwrap();
        assert!(matches!(non_retryable, NonRetryableError::Missing { .. }));
        assert!(err.to_string().contains(&url));
    }

    #[tokio::test]
    async fn test_check_retryable_passes_server_errors_through() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/").with_status(503).create_async().await;

        let response = reqwest::Client::new().get(server.url()).send().await.unwrap();
        let err = check_retryable(response.error_for_status().unwrap_err());

        assert!(err.downcast_ref::<NonRetryableError>().is_none());
        assert!(err.downcast_ref::<reqwest::Error>().is_some());
    }
}
