//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FicheSettings::default()`]
//! 2. If `~/.fiche/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `FICHE_*` environment variable overrides (highest priority)
//! 4. Validate ranges

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{FicheSettings, MAX_PREVIEW_CHARS, MAX_TRANSPORT_BUFFER, MIN_PREVIEW_CHARS};

/// Resolve the path to the settings file (`~/.fiche/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".fiche").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FicheSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<FicheSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Load a settings file merged over defaults, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<FicheSettings> {
    let defaults = serde_json::to_value(FicheSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
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
/// Invalid values are logged and ignored (falling back to file/default).
pub fn apply_env_overrides(settings: &mut FicheSettings) {
    if let Some(v) = read_env_string("FICHE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("FICHE_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = read_env_string("FICHE_SPAWN_TOOLS") {
        let names = parse_name_list(&v);
        if names.is_empty() {
            tracing::warn!(key = "FICHE_SPAWN_TOOLS", value = %v, "empty tool name list, ignoring");
        } else {
            settings.tracking.spawn_tool_names = names;
        }
    }
    if let Some(v) = read_env_usize("FICHE_PREVIEW_MAX_CHARS", MIN_PREVIEW_CHARS, MAX_PREVIEW_CHARS) {
        settings.tracking.preview_max_chars = v;
    }
    if let Some(v) = read_env_bool("FICHE_RELOAD_AFTER_ATTACH") {
        settings.reconnect.reload_history_after_attach = v;
    }
    if let Some(v) = read_env_usize("FICHE_TRANSPORT_BUFFER", 1, MAX_TRANSPORT_BUFFER) {
        settings.reconnect.transport_buffer = v;
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

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks and duplicates.
pub fn parse_name_list(val: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in val.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
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
