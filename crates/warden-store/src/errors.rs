//! Store error types.

/// Errors raised by a [`DataStore`](crate::DataStore).
///
/// Variants carry strings rather than source errors so the type is `Clone`:
/// a failed load is shared by every waiter coalesced onto it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing medium failed.
    #[error("IO error: {0}")]
    Io(String),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requested subject does not exist where existence is required.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store has been closed.
    #[error("store closed")]
    Closed,

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
