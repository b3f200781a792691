//! Feed client error types.

use binggo_core::Transient;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {0}")]
    Status(u16),

    #[error("invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request cancelled")]
    Cancelled,
}

/// Status codes worth another attempt: request timeout, throttling, and
/// server-side failures.
pub fn is_retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}

impl Transient for FeedError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| is_retryable_status(s.as_u16())).unwrap_or(false)
            }
            Self::Status(code) => is_retryable_status(*code),
            Self::InvalidUrl(_) | Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(FeedError::Status(503).is_transient());
        assert!(FeedError::Status(429).is_transient());
        assert!(FeedError::Status(408).is_transient());
        assert!(!FeedError::Status(404).is_transient());
        assert!(!FeedError::Cancelled.is_transient());
    }
}
