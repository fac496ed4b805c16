//! Subject identities.
//!
//! A [`SubjectRef`] names a subject by `(subject_type, identifier)`. It never
//! owns the data it points to: data is always looked up through the cache of
//! the subject's type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Subject type holding the well-known default subjects.
pub const DEFAULT_SUBJECT_TYPE: &str = "default";

/// Identifier of the global default subject within [`DEFAULT_SUBJECT_TYPE`].
pub const GLOBAL_DEFAULT_IDENTIFIER: &str = "default";

/// Reference to a subject by type and identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    #[serde(rename = "type")]
    subject_type: String,
    identifier: String,
}

impl SubjectRef {
    /// Create a reference from its parts.
    #[must_use]
    pub fn new(subject_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            identifier: identifier.into(),
        }
    }

    /// The default subject for a given subject type (`default:<type>`).
    #[must_use]
    pub fn defaults_for(subject_type: &str) -> Self {
        Self::new(DEFAULT_SUBJECT_TYPE, subject_type)
    }

    /// The global default subject (`default:default`).
    #[must_use]
    pub fn global_defaults() -> Self {
        Self::new(DEFAULT_SUBJECT_TYPE, GLOBAL_DEFAULT_IDENTIFIER)
    }

    /// The subject type name.
    #[must_use]
    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    /// The identifier within the subject type.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether this reference points at one of the default subjects.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.subject_type == DEFAULT_SUBJECT_TYPE
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.identifier)
    }
}

impl FromStr for SubjectRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((ty, id)) if !ty.is_empty() && !id.is_empty() => Ok(Self::new(ty, id)),
            _ => Err(CoreError::InvalidSubjectRef(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn display_and_parse_roundtrip() {
        let r = SubjectRef::new("group", "admin");
        assert_eq!(r.to_string(), "group:admin");
        let parsed: SubjectRef = "group:admin".parse().unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn identifier_may_contain_colon() {
        let parsed: SubjectRef = "user:a:b".parse().unwrap();
        assert_eq!(parsed.subject_type(), "user");
        assert_eq!(parsed.identifier(), "a:b");
    }

    #[test]
    fn parse_rejects_missing_parts() {
        assert_matches!("group".parse::<SubjectRef>(), Err(CoreError::InvalidSubjectRef(_)));
        assert_matches!(":admin".parse::<SubjectRef>(), Err(CoreError::InvalidSubjectRef(_)));
        assert_matches!("group:".parse::<SubjectRef>(), Err(CoreError::InvalidSubjectRef(_)));
    }

    #[test]
    fn default_subjects() {
        assert_eq!(SubjectRef::defaults_for("user").to_string(), "default:user");
        assert_eq!(SubjectRef::global_defaults().to_string(), "default:default");
        assert!(SubjectRef::global_defaults().is_default());
        assert!(!SubjectRef::new("user", "bob").is_default());
    }

    #[test]
    fn serde_uses_type_field() {
        let json = serde_json::to_value(SubjectRef::new("group", "mod")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "group", "identifier": "mod"}));
    }
}
