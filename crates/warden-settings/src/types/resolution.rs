//! Resolution settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Controls how subject data is merged during resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolutionSettings {
    /// Merge transient data before persistent data at each context combination.
    pub transient_has_priority: bool,
    /// Per-type overrides of `transient_has_priority`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub transient_priority_overrides: BTreeMap<String, bool>,
    /// Treat unregistered context keys as plain strings instead of ignoring them.
    pub allow_context_fallback: bool,
    /// Subject type holding the global default subject.
    pub default_subject_type: String,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            transient_has_priority: true,
            transient_priority_overrides: BTreeMap::new(),
            allow_context_fallback: true,
            default_subject_type: "default".to_string(),
        }
    }
}

impl ResolutionSettings {
    /// Effective transient priority for `subject_type`.
    #[must_use]
    pub fn transient_priority_for(&self, subject_type: &str) -> bool {
        self.transient_priority_overrides
            .get(subject_type)
            .copied()
            .unwrap_or(self.transient_has_priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let mut settings = ResolutionSettings::default();
        let _ = settings
            .transient_priority_overrides
            .insert("user".into(), false);
        assert!(!settings.transient_priority_for("user"));
        assert!(settings.transient_priority_for("group"));
    }

    #[test]
    fn overrides_omitted_when_empty() {
        let json = serde_json::to_value(ResolutionSettings::default()).unwrap();
        assert!(json.get("transientPriorityOverrides").is_none());
    }
}
