//! Remote execution API errors

use std::time::Duration;
use thiserror::Error;

/// Errors from the remote execution service and its admission layer
#[derive(Debug, Error)]
pub enum ApiError {
    /// Remote service throttled the request (HTTP 429)
    #[error("Rate limited by remote service, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Local admission budget exhausted after retries
    #[error("Rate limit budget exhausted, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// Non-throttling HTTP error from the service
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Network or transport error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed JSON in a response body
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response shape the client cannot use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Event stream dropped before a terminal event
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl ApiError {
    /// Check if this is the remote throttling signal
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Suggested wait, when the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::RateLimitExceeded { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}
