//! Error types for the exposure-data gateway.
//!
//! Errors are split into retryable provider/network conditions and
//! non-retryable ones so callers can decide mechanically whether to retry.

use std::time::Duration;
use thiserror::Error;

/// Longest raw payload excerpt kept in a `MalformedResponse`.
pub const PAYLOAD_EXCERPT_LEN: usize = 256;

/// Errors that can occur when fetching exposure data.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider signalled its rate limit; the circuit is now open.
    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited {
        /// Backoff before the next attempt is allowed.
        retry_after: Duration,
    },

    /// The circuit breaker is open and the caller may not wait for it.
    #[error("circuit open, reopens in {reopen_in:?}")]
    CircuitOpen {
        /// Time until the breaker closes again.
        reopen_in: Duration,
    },

    /// Network failure or provider-side (5xx) error.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider refused the request (4xx other than 429).
    #[error("request rejected: {status} - {message}")]
    RequestRejected {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The body could not be parsed into a valid payload.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        /// What was wrong with the payload.
        reason: String,
        /// Truncated raw payload.
        payload: String,
    },

    /// The symbol failed validation before any request was made.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Client could not be constructed.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Creates a malformed-response error, truncating the payload.
    pub fn malformed(reason: impl Into<String>, payload: &str) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
            payload: excerpt(payload),
        }
    }

    /// Returns true if the same request may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::CircuitOpen { .. } | Self::ProviderUnavailable(_)
        )
    }

    /// Returns the delay the gateway already knows the caller must wait, if any.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::CircuitOpen { reopen_in } => Some(*reopen_in),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ProviderUnavailable(format!("request timeout: {err}"))
        } else if err.is_connect() {
            Self::ProviderUnavailable(format!("connection failed: {err}"))
        } else {
            Self::ProviderUnavailable(err.to_string())
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

pub(crate) fn excerpt(payload: &str) -> String {
    payload.chars().take(PAYLOAD_EXCERPT_LEN).collect()
}
