use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur when calling a marketplace API.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Non-success HTTP status returned by the marketplace.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Server-supplied `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The request did not complete within the client timeout.
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    /// Network or connection error.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Unexpected/internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    /// Create an HTTP status error without a retry hint.
    #[inline]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a 429 error, optionally carrying the server's retry hint.
    #[inline]
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
            retry_after,
        }
    }

    /// Create a timeout error.
    #[inline]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status, if the failure came from a response.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-supplied retry delay, if any.
    #[inline]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<HttpError> for PlatformError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => Self::timeout(msg),
            HttpError::Connect(msg) => Self::network(msg),
            HttpError::Transport(msg) => Self::network(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e.to_string())
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which is useful for errors
/// that carry multi-line response bodies.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for marketplace operations.
pub type Result<T> = std::result::Result<T, PlatformError>;
