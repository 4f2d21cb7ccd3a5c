use lib_pulse::configs::{Settings, SettingsChange, SettingsPatch, SettingsProvider, SettingsStore};
use lib_pulse::core::{Dispatcher, StatusSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Requests from the HTTP side to the pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    SettingsChanged(SettingsChange),
}

/// Settings as exposed over HTTP. The token itself never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub streaming_enabled: bool,
    pub activity_enabled: bool,
    pub has_access_token: bool,
    pub min_activity_interval_ms: u64,
    pub activity_client_id: String,
    pub endpoint_template: String,
}

impl From<Settings> for SettingsView {
    fn from(settings: Settings) -> Self {
        Self {
            streaming_enabled: settings.streaming_enabled,
            activity_enabled: settings.activity_enabled,
            has_access_token: !settings.access_token.is_empty(),
            min_activity_interval_ms: settings.min_activity_interval_ms,
            activity_client_id: settings.activity_client_id,
            endpoint_template: settings.endpoint_template,
        }
    }
}

/// Shared handles for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub dispatcher: Arc<Dispatcher>,
    status: watch::Receiver<StatusSnapshot>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl AppState {
    pub fn new(
        settings: Arc<SettingsStore>,
        dispatcher: Arc<Dispatcher>,
        status: watch::Receiver<StatusSnapshot>,
        control_tx: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            settings,
            dispatcher,
            status,
            control_tx,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn settings_view(&self) -> SettingsView {
        self.settings.snapshot().into()
    }

    /// Applies `patch` and tells the pipeline which subsystems to restart.
    /// The pipeline follows up with a status broadcast even for a no-op patch.
    pub fn apply_settings(&self, patch: SettingsPatch) -> SettingsView {
        let change = self.settings.apply(patch);
        if self.control_tx.send(Control::SettingsChanged(change)).is_err() {
            log::warn!("Pipeline is not running; settings change not applied live.");
        }
        self.settings_view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_settings_forwards_change_and_hides_token() {
        let (_status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let state = AppState::new(
            Arc::new(SettingsStore::new(Settings::default())),
            Arc::new(Dispatcher::new()),
            status_rx,
            control_tx,
        );

        let view = state.apply_settings(SettingsPatch {
            access_token: Some("  secret ".into()),
            ..SettingsPatch::default()
        });

        assert!(view.has_access_token);
        assert!(!serde_json::to_string(&view).unwrap().contains("secret"));
        assert_eq!(
            control_rx.try_recv().unwrap(),
            Control::SettingsChanged(SettingsChange { streaming: true, activity: false })
        );
        assert_eq!(state.settings.snapshot().access_token, "secret");
    }
}
