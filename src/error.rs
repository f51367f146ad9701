//! Error taxonomy shared by every layer of the copilot.
//!
//! Storage and external-service failures are surfaced to the immediate caller
//! unchanged. Nothing in the crate retries or substitutes a fallback value; an
//! empty search result is a valid `Ok`, not an error.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CopilotError>;

/// Errors produced by the retrieval engine, the memory buffer and the
/// completion boundary.
#[derive(Debug, Error)]
pub enum CopilotError {
    /// A read or write against the SQLite database failed.
    #[error("storage error: {0}")]
    Storage(#[from] diesel::result::Error),

    /// The SQLite database could not be opened.
    #[error("storage connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    /// A vector's length disagrees with the store (or query) dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted row could not be decoded back into a typed record.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// The embedding adapter failed to produce a vector.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The BPE tokenizer used for history budgets could not be loaded.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The completion service returned an error or an unusable reply.
    #[error("completion service error: {0}")]
    ExternalService(String),

    /// The completion service did not answer within the caller's deadline.
    #[error("completion service timed out after {0:?}")]
    Timeout(Duration),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CopilotError {
    /// `true` for failures a caller may reasonably retry at its own boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ExternalService(_))
    }
}

impl From<async_openai::error::OpenAIError> for CopilotError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Self::ExternalService(err.to_string())
    }
}

impl From<candle_core::Error> for CopilotError {
    fn from(err: candle_core::Error) -> Self {
        Self::Embedding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = CopilotError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 3");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = CopilotError::Timeout(Duration::from_secs(2));
        assert!(err.is_recoverable());
        assert!(CopilotError::ExternalService("502".into()).is_recoverable());
    }

    #[test]
    fn test_storage_error_from_diesel() {
        let err: CopilotError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, CopilotError::Storage(_)));
        assert!(!err.is_recoverable());
    }
}
