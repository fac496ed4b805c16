//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WardenSettings::default()`]
//! 2. If `~/.warden/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WARDEN_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WardenSettings;

/// Resolve the path to the settings file (`~/.warden/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".warden").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WardenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged settings fail validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<WardenSettings> {
    let mut settings = load_file_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layers(path: &Path) -> Result<WardenSettings> {
    let defaults = serde_json::to_value(WardenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Lists are comma-separated; blank items are dropped
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_env_overrides(settings: &mut WardenSettings) {
    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("WARDEN_CACHE_MAX_SIZE", 1, 10_000_000) {
        settings.cache.max_size = v;
    }
    if let Some(v) = read_env_list("WARDEN_ALWAYS_RESIDENT") {
        settings.cache.always_resident = v;
    }

    // ── Resolution ──────────────────────────────────────────────────
    if let Some(v) = read_env_bool("WARDEN_TRANSIENT_HAS_PRIORITY") {
        settings.resolution.transient_has_priority = v;
    }
    if let Some(v) = read_env_bool("WARDEN_ALLOW_CONTEXT_FALLBACK") {
        settings.resolution.allow_context_fallback = v;
    }
    if let Some(v) = read_env_string("WARDEN_DEFAULT_SUBJECT_TYPE") {
        settings.resolution.default_subject_type = v;
    }

    // ── Contexts ────────────────────────────────────────────────────
    if let Some(v) = read_env_list("WARDEN_SERVER_TAGS") {
        settings.contexts.server_tags = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WARDEN_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a comma-separated list, trimming items and dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_list(name: &str) -> Option<Vec<String>> {
    read_env_string(name).map(|v| parse_list(&v))
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
