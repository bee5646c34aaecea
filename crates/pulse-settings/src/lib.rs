//! # pulse-settings
//!
//! Layered configuration for the Pulse session client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **User file**: `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! There is no global instance: whoever composes the process loads settings
//! once and hands them to the session.

#![deny(unsafe_code)]

pub mod endpoint;
pub mod errors;
pub mod loader;
pub mod types;

pub use endpoint::derive_ws_url;
pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = PulseSettings::default();
        let _path = settings_path();
        assert!(derive_ws_url("http://h", "/ws").is_ok());
    }

    #[test]
    fn settings_path_under_pulse_dir() {
        let path = settings_path();
        assert!(path.ends_with(".pulse/settings.json"));
    }
}
