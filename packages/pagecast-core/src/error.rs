//! Centralized error types for the Pagecast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::capture::encoder::EncoderError;
use crate::display::DisplayError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DisplayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "display_spawn_failed",
            Self::Exhausted => "display_numbers_exhausted",
        }
    }
}

impl ErrorCode for BrowserError {
    fn code(&self) -> &'static str {
        match self {
            Self::CookieSourceConflict => "cookie_source_conflict",
            Self::CookieFile(_) => "cookie_file_invalid",
            Self::Launch(_) => "browser_launch_failed",
            Self::NavigationTimeout(_) => "navigation_timeout",
        }
    }
}

impl ErrorCode for EncoderError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "encoder_already_running",
            Self::Spawn(_) => "encoder_spawn_failed",
        }
    }
}

/// Application-wide error type for the Pagecast server.
#[derive(Debug, Error)]
pub enum PagecastError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested session ID does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Virtual display failed to start.
    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    /// Browser failed to launch or navigate.
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Encoder failed to start.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Watchdog detected steady-state stale output.
    #[error("Stale output: no fresh segments for {age_ms}ms (threshold {threshold_ms}ms)")]
    StaleOutput {
        /// Observed age of the newest segment.
        age_ms: u64,
        /// Configured staleness threshold.
        threshold_ms: u64,
    },

    /// Warmup deadline elapsed without a fresh playlist.
    #[error("Warmup timed out after {0}ms without fresh output")]
    WarmupTimeout(u64),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PagecastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Display(e) => e.code(),
            Self::Browser(e) => e.code(),
            Self::Encoder(e) => e.code(),
            Self::StaleOutput { .. } => "stale_output",
            Self::WarmupTimeout(_) => "warmup_timeout",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::Browser(BrowserError::CookieSourceConflict) => {
                StatusCode::BAD_REQUEST
            }
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type PagecastResult<T> = Result<T, PagecastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for PagecastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::utils::UrlValidationError> for PagecastError {
    fn from(err: crate::utils::UrlValidationError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
