//! # nspwire-settings
//!
//! Socket configuration for the wiring engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WireSettings::default()`]
//! 2. **Settings file**: deep-merged over defaults
//! 3. **Environment variables**: `NSPWIRE_*` overrides
//!
//! Connect requests are resolved against the loaded sockets with
//! [`resolve_connect`]. There is no process-wide settings instance; the
//! engine owns the settings it was built with.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod resolve;
pub mod types;

pub use errors::{ConfigError, Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, merge_layer, settings_path};
pub use resolve::{merge_sockets, resolve_connect, ResolvedConnect, DEFAULT_STATUS_PROP};
pub use types::*;
