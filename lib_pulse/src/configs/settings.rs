//! # Runtime Settings
//!
//! The feature toggles and credentials the pipeline reads while it runs.
//! [`SettingsStore`] is the in-memory [`SettingsProvider`]; every read hands
//! out a snapshot so no lock is held across an await.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Realtime endpoint; `{token}` is replaced by the percent-encoded access token.
pub const DEFAULT_ENDPOINT_TEMPLATE: &str =
    "wss://dev.pulsoid.net/api/v1/data/real_time?access_token={token}";

/// Application id registered for the presence integration.
pub const DEFAULT_ACTIVITY_CLIENT_ID: &str = "1284103861388185600";

/// Default spacing between two presence updates.
pub const DEFAULT_MIN_ACTIVITY_INTERVAL_MS: u64 = 5000;

/// Presence updates are never spaced closer than this.
pub const MIN_ACTIVITY_INTERVAL_FLOOR_MS: u64 = 1000;

const TOKEN_PLACEHOLDER: &str = "{token}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("No access token configured")]
    MissingAccessToken,

    #[error("Endpoint URL is invalid ({reason}): {url}")]
    InvalidEndpoint { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub streaming_enabled: bool,
    pub activity_enabled: bool,
    pub access_token: String,
    pub min_activity_interval_ms: u64,
    pub activity_client_id: String,
    pub endpoint_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            streaming_enabled: true,
            activity_enabled: false,
            access_token: String::new(),
            min_activity_interval_ms: DEFAULT_MIN_ACTIVITY_INTERVAL_MS,
            activity_client_id: DEFAULT_ACTIVITY_CLIENT_ID.to_string(),
            endpoint_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
        }
    }
}

impl Settings {
    /// Minimum spacing between presence updates, never below the floor.
    pub fn min_activity_interval(&self) -> Duration {
        Duration::from_millis(self.min_activity_interval_ms.max(MIN_ACTIVITY_INTERVAL_FLOOR_MS))
    }

    /// Presence client id, if one is configured.
    pub fn activity_client_id(&self) -> Option<&str> {
        let id = self.activity_client_id.trim();
        (!id.is_empty()).then_some(id)
    }

    /// # Resolve Endpoint URL
    ///
    /// Substitutes the percent-encoded access token into the endpoint template.
    ///
    /// # Errors
    /// - [`SettingsError::MissingAccessToken`] when the token is blank.
    /// - [`SettingsError::InvalidEndpoint`] when the result does not parse as a URL.
    pub fn endpoint_url(&self) -> Result<String, SettingsError> {
        let token = self.access_token.trim();
        if token.is_empty() {
            return Err(SettingsError::MissingAccessToken);
        }

        let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        let raw = self.endpoint_template.replace(TOKEN_PLACEHOLDER, &encoded);

        url::Url::parse(&raw)
            .map(String::from)
            .map_err(|e| SettingsError::InvalidEndpoint {
                url: self.endpoint_template.clone(),
                reason: e.to_string(),
            })
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub streaming_enabled: Option<bool>,
    pub activity_enabled: Option<bool>,
    pub access_token: Option<String>,
    pub min_activity_interval_ms: Option<u64>,
    pub activity_client_id: Option<String>,
    pub endpoint_template: Option<String>,
}

/// Which subsystems have to react to an applied patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Streaming toggle, token or endpoint changed: restart the stream client.
    pub streaming: bool,
    /// Activity toggle or client id changed: re-run teardown + ensure.
    pub activity: bool,
}

impl SettingsChange {
    pub fn is_empty(&self) -> bool {
        !self.streaming && !self.activity
    }
}

/// Read/patch access to the runtime settings.
pub trait SettingsProvider: Send + Sync {
    /// A consistent copy of the current settings.
    fn snapshot(&self) -> Settings;

    /// Applies `patch` and reports which subsystems are affected.
    fn apply(&self, patch: SettingsPatch) -> SettingsChange;
}

/// # Settings Store
///
/// In-memory [`SettingsProvider`]. Tokens are trimmed and the activity interval
/// is clamped to [`MIN_ACTIVITY_INTERVAL_FLOOR_MS`] on the way in.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        let store = Self::default();
        store.apply(SettingsPatch {
            streaming_enabled: Some(initial.streaming_enabled),
            activity_enabled: Some(initial.activity_enabled),
            access_token: Some(initial.access_token),
            min_activity_interval_ms: Some(initial.min_activity_interval_ms),
            activity_client_id: Some(initial.activity_client_id),
            endpoint_template: Some(initial.endpoint_template),
        });
        store
    }
}

impl SettingsProvider for SettingsStore {
    fn snapshot(&self) -> Settings {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn apply(&self, patch: SettingsPatch) -> SettingsChange {
        let mut current = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = current.clone();

        if let Some(enabled) = patch.streaming_enabled {
            current.streaming_enabled = enabled;
        }
        if let Some(enabled) = patch.activity_enabled {
            current.activity_enabled = enabled;
        }
        if let Some(token) = patch.access_token {
            current.access_token = token.trim().to_string();
        }
        if let Some(interval) = patch.min_activity_interval_ms {
            current.min_activity_interval_ms = interval.max(MIN_ACTIVITY_INTERVAL_FLOOR_MS);
        }
        if let Some(id) = patch.activity_client_id {
            current.activity_client_id = id.trim().to_string();
        }
        if let Some(template) = patch.endpoint_template {
            current.endpoint_template = template.trim().to_string();
        }

        let change = SettingsChange {
            streaming: before.streaming_enabled != current.streaming_enabled
                || before.access_token != current.access_token
                || before.endpoint_template != current.endpoint_template,
            activity: before.activity_enabled != current.activity_enabled
                || before.activity_client_id != current.activity_client_id,
        };
        if !change.is_empty() {
            log::debug!("Settings changed: {:?}", change);
        }
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_requires_token() {
        let settings = Settings::default();
        assert_eq!(settings.endpoint_url(), Err(SettingsError::MissingAccessToken));

        let blank = Settings { access_token: "   ".into(), ..Settings::default() };
        assert_eq!(blank.endpoint_url(), Err(SettingsError::MissingAccessToken));
    }

    #[test]
    fn endpoint_url_encodes_token() {
        let settings = Settings { access_token: "a b&c".into(), ..Settings::default() };
        let url = settings.endpoint_url().unwrap();
        assert_eq!(url, "wss://dev.pulsoid.net/api/v1/data/real_time?access_token=a+b%26c");
    }

    #[test]
    fn endpoint_url_rejects_garbage_template() {
        let settings = Settings {
            access_token: "tok".into(),
            endpoint_template: "not a url {token}".into(),
            ..Settings::default()
        };
        assert!(matches!(settings.endpoint_url(), Err(SettingsError::InvalidEndpoint { .. })));
    }

    #[test]
    fn apply_trims_and_clamps() {
        let store = SettingsStore::new(Settings::default());
        store.apply(SettingsPatch {
            access_token: Some("  tok  ".into()),
            min_activity_interval_ms: Some(10),
            ..SettingsPatch::default()
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.access_token, "tok");
        assert_eq!(snapshot.min_activity_interval_ms, MIN_ACTIVITY_INTERVAL_FLOOR_MS);
        assert_eq!(snapshot.min_activity_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn apply_reports_affected_subsystems() {
        let store = SettingsStore::new(Settings::default());

        let change = store.apply(SettingsPatch { access_token: Some("tok".into()), ..SettingsPatch::default() });
        assert_eq!(change, SettingsChange { streaming: true, activity: false });

        let change = store.apply(SettingsPatch { activity_enabled: Some(true), ..SettingsPatch::default() });
        assert_eq!(change, SettingsChange { streaming: false, activity: true });

        // Same values again: nothing to restart.
        let change = store.apply(SettingsPatch {
            access_token: Some("tok".into()),
            activity_enabled: Some(true),
            min_activity_interval_ms: Some(8000),
            ..SettingsPatch::default()
        });
        assert!(change.is_empty());
        assert_eq!(store.snapshot().min_activity_interval_ms, 8000);
    }

    #[test]
    fn patch_deserializes_camel_case() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"streamingEnabled":false,"minActivityIntervalMs":2500}"#).unwrap();
        assert_eq!(patch.streaming_enabled, Some(false));
        assert_eq!(patch.min_activity_interval_ms, Some(2500));
        assert_eq!(patch.access_token, None);
    }
}
