//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a settings file
//! only needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Smallest accepted `tracking.previewMaxChars`.
pub const MIN_PREVIEW_CHARS: usize = 16;
/// Largest accepted `tracking.previewMaxChars`.
pub const MAX_PREVIEW_CHARS: usize = 10_000;
/// Largest accepted `reconnect.transportBuffer`.
pub const MAX_TRANSPORT_BUFFER: usize = 65_536;

/// Root settings.
///
/// ```json
/// {
///   "logging": { "level": "debug" },
///   "tracking": { "spawnToolNames": ["spawn_commis"] }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FicheSettings {
    /// Settings schema version.
    pub version: String,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Tool call tracking.
    pub tracking: TrackingSettings,
    /// Startup reconnection.
    pub reconnect: ReconnectSettings,
}

impl Default for FicheSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            logging: LoggingSettings::default(),
            tracking: TrackingSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl FicheSettings {
    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let chars = self.tracking.preview_max_chars;
        if !(MIN_PREVIEW_CHARS..=MAX_PREVIEW_CHARS).contains(&chars) {
            return Err(SettingsError::Invalid {
                key: "tracking.previewMaxChars",
                reason: format!("must be within {MIN_PREVIEW_CHARS}..={MAX_PREVIEW_CHARS}, got {chars}"),
            });
        }
        let buffer = self.reconnect.transport_buffer;
        if !(1..=MAX_TRANSPORT_BUFFER).contains(&buffer) {
            return Err(SettingsError::Invalid {
                key: "reconnect.transportBuffer",
                reason: format!("must be within 1..={MAX_TRANSPORT_BUFFER}, got {buffer}"),
            });
        }
        if self.tracking.spawn_tool_names.iter().any(|n| n.trim().is_empty()) {
            return Err(SettingsError::Invalid {
                key: "tracking.spawnToolNames",
                reason: "must not contain empty names".into(),
            });
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level or `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl LoggingSettings {
    /// Install the global subscriber this configuration describes.
    ///
    /// `RUST_LOG` still overrides `level`. Later calls are no-ops once a
    /// subscriber is installed.
    pub fn init_subscriber(&self) {
        if self.json {
            fiche_core::logging::init_json_subscriber(&self.level);
        } else {
            fiche_core::logging::init_subscriber(&self.level);
        }
    }
}

/// Tool call tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingSettings {
    /// Tool names whose calls spawn a sub-agent worker.
    pub spawn_tool_names: Vec<String>,
    /// Display strings are cut to this many characters.
    pub preview_max_chars: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            spawn_tool_names: vec!["spawn_commis".to_string(), "spawn_worker".to_string()],
            preview_max_chars: 200,
        }
    }
}

/// Startup reconnection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Reload finalized history after attaching to an active run.
    pub reload_history_after_attach: bool,
    /// Channel capacity offered to event transports.
    pub transport_buffer: usize,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            reload_history_after_attach: true,
            transport_buffer: 256,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
