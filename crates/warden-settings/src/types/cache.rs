//! Subject data cache settings.

use serde::{Deserialize, Serialize};

/// Sizing for the per-type subject data caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Maximum cached identifiers per subject type.
    pub max_size: usize,
    /// Subject types whose caches are never bounded and are warmed at startup.
    pub always_resident: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 512,
            always_resident: vec!["group".to_string(), "default".to_string()],
        }
    }
}

impl CacheSettings {
    /// Whether `subject_type` is kept fully resident.
    #[must_use]
    pub fn is_always_resident(&self, subject_type: &str) -> bool {
        self.always_resident.iter().any(|t| t == subject_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_resident_lookup() {
        let settings = CacheSettings::default();
        assert!(settings.is_always_resident("group"));
        assert!(!settings.is_always_resident("user"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: CacheSettings = serde_json::from_str(r#"{"maxSize": 64}"#).unwrap();
        assert_eq!(settings.max_size, 64);
        assert_eq!(settings.always_resident.len(), 2);
    }
}
