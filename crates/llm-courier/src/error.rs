//! Error taxonomy for every client call.
//!
//! Each failure surfaces to the immediate caller as one [`LlmError`] variant.
//! The only silent tolerances in the crate are skipped malformed stream lines
//! and the multi-step JSON recovery in [`api::extract`](crate::api::extract).

use thiserror::Error;

use crate::api::retry::RETRYABLE_STATUS_CODES;

/// Errors returned by [`LlmClient`](crate::LlmClient) calls.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Endpoint or credential missing. Raised before any network I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection, timeout, or body-read failure.
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status after all attempts.
    #[error("remote API error (HTTP {status}): {message}")]
    RemoteApi { status: u16, message: String },

    /// A 2xx response that does not carry the expected assistant message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Structured output could not be recovered from the model's text.
    #[error("failed to parse JSON response: {content}")]
    Parse { content: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    /// HTTP status of a [`RemoteApi`](LlmError::RemoteApi) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure class is one the transport retrier would retry.
    ///
    /// Informational only: by the time a caller sees the error, the retry
    /// budget has already been spent.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) => true,
            LlmError::RemoteApi { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("request timed out: {e}"))
        } else if e.is_connect() {
            LlmError::Network(format!("connection failed: {e}"))
        } else {
            LlmError::Network(format!("request failed: {e}"))
        }
    }
}
