// SPDX-License-Identifier: MIT

use thiserror::Error;

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Expected failure modes of the catalog core. Everything here crosses
/// component boundaries as a value; only logic violations may panic.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The configured base URL could not be normalized into something
    /// requestable. Raised before any network traffic.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Upstream rejected the credentials or the account is not active.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-2xx response from the panel.
    #[error("HTTP {status} from upstream")]
    Http { status: u16 },

    /// Timeout, DNS failure, connection reset and friends.
    #[error("transport error: {0}")]
    Transport(String),

    /// The body arrived but did not decode as the expected JSON shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl CatalogError {
    pub fn from_transport(err: &reqwest::Error) -> Self {
        CatalogError::Transport(err.to_string())
    }

    /// Retry only makes sense for transient upstream conditions.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Http { status } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            CatalogError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(CatalogError::Http { status: 408 }.is_retryable());
        assert!(CatalogError::Http { status: 429 }.is_retryable());
        assert!(CatalogError::Http { status: 500 }.is_retryable());
        assert!(CatalogError::Http { status: 503 }.is_retryable());
        assert!(!CatalogError::Http { status: 404 }.is_retryable());
        assert!(!CatalogError::Http { status: 200 }.is_retryable());
    }

    #[test]
    fn config_and_auth_errors_never_retry() {
        assert!(!CatalogError::InvalidBaseUrl("x".into()).is_retryable());
        assert!(!CatalogError::Auth("inactive".into()).is_retryable());
        assert!(!CatalogError::Parse("bad json".into()).is_retryable());
    }
}
