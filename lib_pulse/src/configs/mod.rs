//! # Configuration Modules
//!
//! Runtime settings consumed by the stream client and the activity notifier.
//! The storage backend is not ours: callers seed a [`SettingsStore`] and
//! patch it at runtime.

/// Runtime settings, patches and the in-memory provider.
pub mod settings;

pub use settings::{
    Settings, SettingsChange, SettingsError, SettingsPatch, SettingsProvider, SettingsStore,
    DEFAULT_ACTIVITY_CLIENT_ID, DEFAULT_ENDPOINT_TEMPLATE, DEFAULT_MIN_ACTIVITY_INTERVAL_MS,
    MIN_ACTIVITY_INTERVAL_FLOOR_MS,
};
