//! Core error types.

use thiserror::Error;

/// Errors raised while parsing core identities from their string forms.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A subject reference was not of the form `type:identifier`.
    #[error("invalid subject reference '{0}': expected 'type:identifier'")]
    InvalidSubjectRef(String),
    /// A context value was not of the form `key=value`.
    #[error("invalid context value '{0}': expected 'key=value'")]
    InvalidContextValue(String),
}

/// Result type for core parsing operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_ref_error_display() {
        let err = CoreError::InvalidSubjectRef("nocolon".into());
        assert_eq!(
            err.to_string(),
            "invalid subject reference 'nocolon': expected 'type:identifier'"
        );
    }

    #[test]
    fn context_value_error_display() {
        let err = CoreError::InvalidContextValue("world".into());
        assert!(err.to_string().contains("key=value"));
    }
}
