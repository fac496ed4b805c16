//! Context settings: server tags and context inheritance declarations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use warden_core::{ContextInheritance, ContextValue};

use crate::errors::{Result, SettingsError};

/// Context configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Tags reported as active `server-tag` contexts.
    pub server_tags: Vec<String>,
    /// Context inheritance as `"key=value"` to ordered `"key=value"` parents.
    pub inheritance: BTreeMap<String, Vec<String>>,
}

impl ContextSettings {
    /// Parse [`Self::inheritance`] into a [`ContextInheritance`].
    pub fn context_inheritance(&self) -> Result<ContextInheritance> {
        self.inheritance
            .iter()
            .map(|(child, parents)| {
                let child = parse_context(child)?;
                let parents = parents
                    .iter()
                    .map(|p| parse_context(p))
                    .collect::<Result<Vec<_>>>()?;
                Ok((child, parents))
            })
            .collect()
    }
}

fn parse_context(raw: &str) -> Result<ContextValue> {
    raw.parse()
        .map_err(|_| SettingsError::InvalidValue(format!("invalid context '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn inheritance_parses_declarations() {
        let settings: ContextSettings = serde_json::from_str(
            r#"{"inheritance": {"world=nether": ["world=overworld", "server-tag=survival"]}}"#,
        )
        .unwrap();
        let inheritance = settings.context_inheritance().unwrap();
        let nether: ContextValue = "world=nether".parse().unwrap();
        assert_eq!(inheritance.parents(&nether).len(), 2);
        assert_eq!(inheritance.parents(&nether)[0].raw(), "overworld");
    }

    #[test]
    fn inheritance_rejects_malformed_parent() {
        let mut settings = ContextSettings::default();
        let _ = settings
            .inheritance
            .insert("world=nether".into(), vec!["overworld".into()]);
        assert_matches!(
            settings.context_inheritance(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("overworld")
        );
    }
}
