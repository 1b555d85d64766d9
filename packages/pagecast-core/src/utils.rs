//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Source URL Validation
// ─────────────────────────────────────────────────────────────────────────────

use url::Url;

use crate::error::ErrorCode;

/// Error returned when a URL is not a valid cast source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    /// The string could not be parsed as an absolute URL.
    NotAbsolute,
    /// Scheme other than `http` or `https`.
    UnsupportedScheme(String),
    /// URL has no host component.
    MissingHost,
}

impl ErrorCode for UrlValidationError {
    /// All validation failures report `"invalid_url"` to API clients.
    fn code(&self) -> &'static str {
        "invalid_url"
    }
}

impl UrlValidationError {
    /// Returns a human-readable description of the error.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NotAbsolute => "source url must be an absolute URL".to_string(),
            Self::UnsupportedScheme(s) => {
                format!("source url scheme '{s}' is not supported; use http or https")
            }
            Self::MissingHost => "source url has no host".to_string(),
        }
    }
}

impl std::fmt::Display for UrlValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for UrlValidationError {}

/// Validates that a string is an absolute http(s) URL suitable as a cast source.
///
/// Returns the parsed URL for canonical storage.
///
/// # Examples
///
/// ```
/// use pagecast_core::validate_source_url;
///
/// assert!(validate_source_url("https://example.com/watch").is_ok());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// assert!(validate_source_url("not a url").is_err());
/// ```
pub fn validate_source_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw).map_err(|_| UrlValidationError::NotAbsolute)?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(UrlValidationError::MissingHost);
    }
    Ok(url)
}
