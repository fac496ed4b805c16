//! # warden-settings
//!
//! Configuration for the warden permission engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WardenSettings::default()`]
//! 2. **User file**: `~/.warden/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WARDEN_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use warden_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("cache bound: {}", settings.cache.max_size);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, initialized on first access via [`get_settings`].
static SETTINGS: OnceLock<WardenSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.warden/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static WardenSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            WardenSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WardenSettings) -> std::result::Result<(), WardenSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = WardenSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = WardenSettings::default();
        assert_eq!(settings.cache.max_size, 512);
        assert_eq!(settings.cache.always_resident, vec!["group", "default"]);
        assert!(settings.resolution.transient_has_priority);
        assert!(settings.resolution.allow_context_fallback);
        assert_eq!(settings.resolution.default_subject_type, "default");
        assert!(settings.contexts.server_tags.is_empty());
        assert_eq!(settings.logging.level, "warn");
        assert!(settings.validate().is_ok());
    }
}
