//! Common utilities shared across connectors.
//!
//! HTTP client creation, URL validation and mapping of HTTP failures onto
//! the crate's error taxonomy.

use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;

/// Default HTTP timeout for all connectors.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait applied to a 429 response without a usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Creates a configured HTTP client with timeout.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Validates an endpoint URL (anti-SSRF: only http and https).
pub fn validate_url(url: &str) -> Result<()> {
    let valid_schemes = ["http://", "https://"];
    let has_valid_scheme = valid_schemes.iter().any(|s| url.starts_with(s));

    if !has_valid_scheme {
        return Err(Error::Config(format!(
            "Invalid URL scheme in '{}'. Allowed: http, https",
            url
        )));
    }

    if url.len() < 10 || !url.contains("://") {
        return Err(Error::Config(format!("Invalid URL format: {}", url)));
    }

    Ok(())
}

/// Parses a `Retry-After` header value given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Handles HTTP error responses and returns appropriate errors.
pub fn handle_http_error(status_code: u16, body: &str, source_name: &str) -> Error {
    match status_code {
        429 => Error::RateLimit(DEFAULT_RETRY_AFTER_SECS),
        401 | 403 => Error::Authentication(format!("{} auth failed: {}", source_name, body)),
        _ => Error::SourceConnection(format!("{} error {}: {}", source_name, status_code, body)),
    }
}
