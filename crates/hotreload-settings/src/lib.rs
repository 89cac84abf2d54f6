//! # hotreload-settings
//!
//! Configuration for the hot-reload server, loaded from three layers (in
//! priority order):
//!
//! 1. **Compiled defaults**: [`HotReloadSettings::default()`]
//! 2. **Settings file**: `$HOTRELOAD_SETTINGS` or `~/.axiom/hotreload.json`,
//!    deep-merged over defaults
//! 3. **Environment variables**: `HOTRELOAD_*` overrides (highest priority)
//!
//! Every value has a default, so an empty or absent file is valid.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, load_with_env, settings_path,
};
pub use types::*;
