//! # vigil-settings
//!
//! Layered configuration for the Vigil server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **Settings file**: `~/.vigil/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `VIGIL_*` overrides (highest priority)
//!
//! Command-line flags in the `vigil` binary are applied on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, load_settings, load_settings_from_path, merge_layer, settings_path};
pub use types::{LoggingSettings, ServerSettings, VigilSettings};
