//! HTTP response classification shared by the reqwest-backed adapters.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use super::ProviderError;

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// Parse a `retry-after` header given in seconds
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status to a provider error
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = truncate_body(body);
    match status.as_u16() {
        429 => ProviderError::RateLimited { retry_after },
        401 | 403 => ProviderError::MissingCredentials(format!("{}: {}", status, message)),
        408 => ProviderError::Timeout(Duration::ZERO),
        code => ProviderError::Api { status: code, message },
    }
}

/// Map a transport-level reqwest error
pub fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(Duration::ZERO)
    } else if err.is_decode() {
        ProviderError::Invalid(format!("Failed to parse response: {}", err))
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Read the response body for an error message, tolerating read failures
pub async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string())
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}
