//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Types marked `#[serde(default)]`
//! accept partial JSON; missing fields get their default.

mod cache;
mod contexts;
mod resolution;

pub use cache::*;
pub use contexts::*;
pub use resolution::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the warden engine.
///
/// # JSON Format
///
/// ```json
/// {
///   "cache": { "maxSize": 1024 },
///   "resolution": { "transientHasPriority": false },
///   "contexts": { "inheritance": { "world=nether": ["world=overworld"] } }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Subject data cache sizing.
    pub cache: CacheSettings,
    /// Resolution behaviour.
    pub resolution: ResolutionSettings,
    /// Context definitions and inheritance.
    pub contexts: ContextSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl WardenSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(SettingsError::InvalidValue(
                "cache.maxSize must be at least 1".into(),
            ));
        }
        if self.resolution.default_subject_type.is_empty() {
            return Err(SettingsError::InvalidValue(
                "resolution.defaultSubjectType must not be empty".into(),
            ));
        }
        let _ = self.contexts.context_inheritance()?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive passed to `init_subscriber`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Install the global subscriber filtered at [`Self::level`].
    ///
    /// `RUST_LOG` still wins when set; later calls are no-ops.
    pub fn init_subscriber(&self) {
        warden_core::logging::init_subscriber(&self.level);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
