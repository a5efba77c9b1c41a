//! Error types for the relay middleware.

use thiserror::Error;

/// Failure reported by a member provider on its change stream.
///
/// These are surfaced through the stream's failure channel and terminate the
/// subscription that observed them.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Members decoding error: {0}")]
    Decoding(String),

    #[error("Members encoding error: {0}")]
    Encoding(String),

    #[error("Members data not found: {0}")]
    DataNotFound(String),
}

/// Main error type for middleware operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Subscription dropped")]
    SubscriptionDropped,

    #[error("Failed to spawn relay worker: {0}")]
    WorkerSpawn(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RelayError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RelayError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RelayError::Deserialization(e.to_string())
    }
}

/// Result type for middleware operations.
pub type Result<T> = std::result::Result<T, RelayError>;
