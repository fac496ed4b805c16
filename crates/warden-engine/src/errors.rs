//! Engine error types.

use thiserror::Error;
use warden_cache::CacheError;
use warden_settings::SettingsError;

/// Errors surfaced by the permissions engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Loading or persisting subject data failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The engine configuration was rejected.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A subject type name that cannot be served.
    #[error("unknown subject type: {0:?}")]
    UnknownSubjectType(String),

    /// The engine has been closed.
    #[error("permissions engine closed")]
    Closed,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::StoreError;

    #[test]
    fn cache_errors_pass_through() {
        let err: EngineError = CacheError::Loading {
            subject_type: "user".into(),
            identifier: "alice".into(),
            source: StoreError::Io("disk".into()),
        }
        .into();
        assert_eq!(err.to_string(), "failed to load user:alice: IO error: disk");
    }

    #[test]
    fn unknown_type_display() {
        assert_eq!(
            EngineError::UnknownSubjectType(String::new()).to_string(),
            "unknown subject type: \"\""
        );
    }
}
