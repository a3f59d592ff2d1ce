//! # fiche-settings
//!
//! Configuration with layered sources for live fiche run tracking.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FicheSettings::default()`]
//! 2. **User file**: `~/.fiche/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `FICHE_*` overrides (highest priority)
//!
//! The tracking components take their settings by injection. The global
//! accessor exists for the application root that builds them.
//! That root also installs logging with
//! `get_settings().logging.init_subscriber()`.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<FicheSettings> = OnceLock::new();

/// Get the process-wide settings.
///
/// Loaded on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static FicheSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            FicheSettings::default()
        })
    })
}

/// Initialize the process-wide settings with a specific value.
///
/// Returns the value back if settings were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: FicheSettings) -> std::result::Result<(), FicheSettings> {
    SETTINGS.set(settings)
}
