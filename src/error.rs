//! Error types for cache operations
//!
//! Every failure the engine can meet is represented here. None of them are
//! fatal: the orchestrator folds them into the status of the result it emits
//! and attaches them to the envelope instead of aborting the call.

use thiserror::Error;

/// Main error type for the response cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// The request could not be hashed; caching is bypassed for the call
    #[error("Fingerprint failure: {0}")]
    FingerprintFailure(String),

    /// The network call failed
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The network call did not complete in time
    #[error("Operation timed out after {timeout_seconds}s: {context}")]
    TimeoutError {
        timeout_seconds: u64,
        context: String,
    },

    /// The payload could not be serialised for storage
    #[error("Serialisation failure: {0}")]
    SerialisationFailure(String),

    /// A stored entry could not be deserialised
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// The call completed without a value
    #[error("Empty result for {0}")]
    EmptyResult(String),

    /// The persistence backend failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A serialised operation could not be parsed
    #[error("Invalid operation '{input}': {reason}")]
    OperationParse { input: String, reason: String },

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether this error came from the network collaborator
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CacheError::NetworkFailure(_) | CacheError::TimeoutError { .. }
        )
    }

    /// Fold a transport error into a network failure, keeping its context chain
    pub fn network(error: anyhow::Error) -> Self {
        CacheError::NetworkFailure(format!("{:#}", error))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerialisationFailure(e.to_string())
    }
}

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
