//! Error types for verifier-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using verifier-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for provider adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur during verification operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is missing, unreadable, or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catalog store operation failed.
    #[error("catalog store error: {0}")]
    Store(String),

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scheduler error (bad cadence expression, unknown job).
    #[error("scheduler error: {0}")]
    Schedule(String),

    /// A provider adapter call failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The run was cancelled before completion.
    #[error("run cancelled")]
    Cancelled,

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Typed errors surfaced by provider adapters.
///
/// The taxonomy drives retry policy: transient errors are retried within a
/// run, permanent errors are folded into the probe verdict, and repeated
/// auth failures escalate to a provider-level issue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Credentials rejected (401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The model or endpoint does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider throttled the request (429).
    #[error("rate limited")]
    RateLimited {
        /// Provider-supplied wait hint, when present.
        retry_after: Option<Duration>,
    },

    /// The provider is overloaded (500/502/503/529).
    #[error("provider overloaded")]
    Overloaded,

    /// The call exceeded the adapter timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be parsed into the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Transport-level failure (DNS, connect, TLS, mid-body).
    #[error("network error: {0}")]
    Network(String),

    /// The provider does not support this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Whether the error is transient and worth retrying within a run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Overloaded | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Provider-supplied back-off hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable kind string for persistence and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthFailed(_) => "auth-failed",
            Self::NotFound(_) => "not-found",
            Self::RateLimited { .. } => "rate-limited",
            Self::Overloaded => "overloaded",
            Self::Timeout(_) => "timeout",
            Self::Malformed(_) => "malformed",
            Self::Network(_) => "network",
            Self::Unsupported(_) => "unsupported",
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported(operation.into())
    }

    /// Create a malformed-response error.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(AdapterError::RateLimited { retry_after: None }.is_transient());
        assert!(AdapterError::Overloaded.is_transient());
        assert!(AdapterError::Timeout(Duration::from_secs(60)).is_transient());
        assert!(AdapterError::Network("reset".into()).is_transient());

        assert!(!AdapterError::AuthFailed("bad key".into()).is_transient());
        assert!(!AdapterError::NotFound("no such model".into()).is_transient());
        assert!(!AdapterError::Malformed("truncated".into()).is_transient());
        assert!(!AdapterError::unsupported("rerank").is_transient());
    }

    #[test]
    fn test_retry_after_extraction() {
        let err = AdapterError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(AdapterError::Overloaded.retry_after(), None);
    }

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(AdapterError::AuthFailed(String::new()).kind(), "auth-failed");
        assert_eq!(
            AdapterError::RateLimited { retry_after: None }.kind(),
            "rate-limited"
        );
        assert_eq!(AdapterError::unsupported("embed").kind(), "unsupported");
    }
}
