//! Cache error types.

use thiserror::Error;
use warden_store::StoreError;

/// Errors surfaced by the cache and reference layer.
#[derive(Clone, Debug, Error)]
pub enum CacheError {
    /// Loading a subject's data from the store failed.
    #[error("failed to load {subject_type}:{identifier}: {source}")]
    Loading {
        /// Subject type of the failed load.
        subject_type: String,
        /// Identifier of the failed load.
        identifier: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Persisting a subject's data to the store failed.
    #[error("failed to persist {subject_type}:{identifier}: {source}")]
    Persist {
        /// Subject type of the failed write.
        subject_type: String,
        /// Identifier of the failed write.
        identifier: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A store-level operation not tied to one identifier failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A background persistence task did not complete.
    #[error("background task failed: {0}")]
    Task(String),

    /// The owning cache has been closed or dropped.
    #[error("cache closed")]
    Closed,
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_display_names_subject() {
        let err = CacheError::Loading {
            subject_type: "user".into(),
            identifier: "alice".into(),
            source: StoreError::Io("disk".into()),
        };
        assert_eq!(err.to_string(), "failed to load user:alice: IO error: disk");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn store_error_converts() {
        let err: CacheError = StoreError::Closed.into();
        assert!(matches!(err, CacheError::Store(StoreError::Closed)));
    }
}
