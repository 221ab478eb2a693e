//! Error types for the companies API client.
//!
//! # Design
//! Every failure is classified. Argument and catalog errors
//! (`UnknownOperation`, `MissingParameter`, `UnknownParameter`,
//! `InvalidFilter`, `InvalidArgument`) are produced before any request is
//! sent. Remote failures keep the operation id, the HTTP status and the raw
//! body so a caller can diagnose them without re-running with tracing on.

use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an `ApiError`, convenient for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownOperation,
    MissingParameter,
    UnknownParameter,
    InvalidFilter,
    InvalidArgument,
    Config,
    Auth,
    Validation,
    NotFound,
    RateLimited,
    Server,
    Timeout,
    Network,
    Decode,
}

/// Errors returned by `CompaniesClient` and its building blocks.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("{operation}: missing required parameter `{name}`")]
    MissingParameter { operation: String, name: String },

    #[error("{operation}: unknown parameter `{name}`")]
    UnknownParameter { operation: String, name: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{operation}: invalid argument `{name}`: {message}")]
    InvalidArgument { operation: String, name: String, message: String },

    /// Client construction failed (missing token, bad base URL, broken catalog).
    #[error("configuration error: {0}")]
    Config(String),

    /// 401 or 403.
    #[error("{operation}: authentication failed (HTTP {status}): {message}")]
    Auth { operation: String, status: u16, message: String, body: String },

    /// Any 4xx not covered by a more specific variant.
    #[error("{operation}: request rejected (HTTP {status}): {message}")]
    Validation { operation: String, status: u16, message: String, body: String },

    #[error("{operation}: not found: {message}")]
    NotFound { operation: String, message: String, body: String },

    #[error("{operation}: rate limited{}", .retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { operation: String, retry_after: Option<Duration>, body: String },

    #[error("{operation}: server error (HTTP {status}): {message}")]
    Server { operation: String, status: u16, message: String, body: String },

    #[error("{operation}: timed out after {}ms", .timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    /// The request never produced a response. `attempts` counts every try,
    /// including retries; `source` is the last underlying failure.
    #[error("{operation}: network failure after {attempts} attempt(s): {source}")]
    Network {
        operation: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("{operation}: undecodable response (HTTP {status}): {message}")]
    Decode { operation: String, status: u16, message: String, body: String },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            ApiError::MissingParameter { .. } => ErrorKind::MissingParameter,
            ApiError::UnknownParameter { .. } => ErrorKind::UnknownParameter,
            ApiError::InvalidFilter(_) => ErrorKind::InvalidFilter,
            ApiError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ApiError::Config(_) => ErrorKind::Config,
            ApiError::Auth { .. } => ErrorKind::Auth,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::Server { .. } => ErrorKind::Server,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// HTTP status of the response that caused the error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Auth { status, .. }
            | ApiError::Validation { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Decode { status, .. } => Some(*status),
            ApiError::NotFound { .. } => Some(404),
            ApiError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Raw response body, for diagnostics.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Auth { body, .. }
            | ApiError::Validation { body, .. }
            | ApiError::NotFound { body, .. }
            | ApiError::RateLimited { body, .. }
            | ApiError::Server { body, .. }
            | ApiError::Decode { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&str> {
        match self {
            ApiError::UnknownOperation(operation)
            | ApiError::MissingParameter { operation, .. }
            | ApiError::UnknownParameter { operation, .. }
            | ApiError::InvalidArgument { operation, .. }
            | ApiError::Auth { operation, .. }
            | ApiError::Validation { operation, .. }
            | ApiError::NotFound { operation, .. }
            | ApiError::RateLimited { operation, .. }
            | ApiError::Server { operation, .. }
            | ApiError::Timeout { operation, .. }
            | ApiError::Network { operation, .. }
            | ApiError::Decode { operation, .. } => Some(operation),
            ApiError::InvalidFilter(_) | ApiError::Config(_) => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether repeating the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::Server | ErrorKind::Timeout | ErrorKind::Network
        )
    }
}
