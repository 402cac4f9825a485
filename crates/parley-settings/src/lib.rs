//! # parley-settings
//!
//! Configuration for the Parley relay, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **Settings file**: `~/.parley/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    data_dir, deep_merge, load_settings, load_settings_from_path, resolve_data_path,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ParleySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = ParleySettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.max_frame_bytes, 512);
        assert_eq!(settings.hub.queue_capacity, 256);
        assert_eq!(settings.hub.membership_fallback, MembershipFallback::Drop);
        assert_eq!(settings.hub.private_routing, PrivateRouting::Local);
        assert_eq!(settings.bridge.transport, TransportKind::Memory);
        assert!(settings.validate().is_ok());
    }
}
