//! Error type system for Cadence
//!
//! This module provides the crate-wide error type with:
//! - Pipeline error classification (probe, persistence, asset, transcode)
//! - Error context and chaining support
//! - HTTP status code mapping
//! - Detailed error messages with trace IDs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

tokio::task_local! {
    /// Trace ID of the HTTP request being handled on this task
    pub static REQUEST_TRACE_ID: String;
}

/// The current request's trace ID, or a fresh one outside a request
pub fn current_trace_id() -> String {
    REQUEST_TRACE_ID
        .try_with(Clone::clone)
        .unwrap_or_else(|_| Uuid::new_v4().to_string())
}

/// Main error type for the Cadence system
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    // Metadata resolution
    #[error("Probe failed: {0}")]
    ProbeError(String),

    #[error("No prober registered for mime type: {0}")]
    NoProberFound(String),

    // Persistence
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    // Asset store
    #[error("Asset write failed: {0}")]
    AssetWriteError(String),

    // Streaming
    #[error("Transcode failed: {0}")]
    TranscodeError(String),

    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    // API-related errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // System-level errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl CadenceError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CadenceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            CadenceError::NotFound(_) | CadenceError::StreamUnavailable(_) => StatusCode::NOT_FOUND,

            CadenceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,

            CadenceError::ProbeError(_)
            | CadenceError::NoProberFound(_)
            | CadenceError::DatabaseError(_)
            | CadenceError::AssetWriteError(_)
            | CadenceError::TranscodeError(_)
            | CadenceError::ConfigError(_)
            | CadenceError::IoError(_)
            | CadenceError::TaskError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            CadenceError::ProbeError(_) => "ProbeError",
            CadenceError::NoProberFound(_) => "NoProberFound",
            CadenceError::DatabaseError(_) => "PersistenceError",
            CadenceError::AssetWriteError(_) => "AssetWriteError",
            CadenceError::TranscodeError(_) => "TranscodeError",
            CadenceError::StreamUnavailable(_) => "StreamUnavailable",
            CadenceError::InvalidRequest(_) => "InvalidRequest",
            CadenceError::NotFound(_) => "NotFound",
            CadenceError::ConfigError(_) => "ConfigError",
            CadenceError::Timeout(_) => "Timeout",
            CadenceError::IoError(_) => "IoError",
            CadenceError::TaskError(_) => "TaskError",
        }
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response tagged with the current request's trace ID
    pub fn new(error: String, message: String) -> Self {
        Self::with_trace_id(error, message, current_trace_id())
    }

    pub fn with_trace_id(error: String, message: String, trace_id: String) -> Self {
        Self {
            error,
            message,
            details: None,
            trace_id,
        }
    }

    pub fn with_details(error: String, message: String, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(error, message)
        }
    }

    /// Create an error response from a CadenceError
    pub fn from_error(error: &CadenceError) -> Self {
        Self::new(error.error_type().to_string(), error.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (trace_id: {})",
            self.error, self.message, self.trace_id
        )
    }
}

impl IntoResponse for CadenceError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        tracing::error!(
            error_type = self.error_type(),
            trace_id = %error_response.trace_id,
            status_code = %status_code,
            "Request failed: {}",
            self
        );

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with CadenceError
pub type Result<T> = std::result::Result<T, CadenceError>;

/// Context extension trait for turning foreign errors into `CadenceError`
pub trait ErrorContext<T> {
    /// Wrap the error as a `TaskError` carrying `context`
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error using a constructor for the target variant
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce(String) -> CadenceError;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CadenceError::TaskError(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce(String) -> CadenceError,
    {
        self.map_err(|e| f(e.to_string()))
    }
}
