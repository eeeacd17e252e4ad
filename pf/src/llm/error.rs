//! Inference client errors
//!
//! Only [`LlmError::RateLimited`] is retried by the scheduler; every other
//! variant ends the request.

use std::time::Duration;
use thiserror::Error;

use super::RateLimitMetadata;

#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429, with whatever rate-limit state the service reported
    #[error("Rate limited, retry after {:?}", .metadata.retry_after)]
    RateLimited { metadata: RateLimitMetadata },

    /// Any other non-success status; windows reported alongside it are kept
    #[error("API error {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        metadata: RateLimitMetadata,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The call was sent but no reply arrived in time; it may have been billed
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Malformed response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Client misconfigured: {0}")]
    Config(String),
}

impl LlmError {
    /// Rate-limit rejection carrying only a retry hint
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        LlmError::RateLimited {
            metadata: RateLimitMetadata {
                retry_after,
                ..Default::default()
            },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Rate-limit metadata the service sent with this failure, if any
    pub fn rate_limits(&self) -> Option<&RateLimitMetadata> {
        match self {
            LlmError::RateLimited { metadata } | LlmError::ApiError { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_rate_limit() {
        let err = LlmError::rate_limited(Some(Duration::from_secs(60)));
        assert!(err.is_rate_limit());

        let err = LlmError::ApiError {
            status: 500,
            message: "Server error".to_string(),
            metadata: RateLimitMetadata::default(),
        };
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_rate_limits() {
        let err = LlmError::rate_limited(Some(Duration::from_secs(42)));
        assert_eq!(err.rate_limits().unwrap().retry_after, Some(Duration::from_secs(42)));

        let err = LlmError::ApiError {
            status: 400,
            message: "bad request".to_string(),
            metadata: RateLimitMetadata {
                retry_after: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        };
        assert!(err.rate_limits().is_some());

        let err = LlmError::InvalidResponse("bad".to_string());
        assert!(err.rate_limits().is_none());
    }

    #[test]
    fn test_display_includes_hint() {
        let err = LlmError::rate_limited(Some(Duration::from_secs(3)));
        assert_eq!(err.to_string(), "Rate limited, retry after Some(3s)");
    }
}
