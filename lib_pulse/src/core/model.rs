//! # Pipeline Data Model
//!
//! The values that travel from the stream client to the sinks. Everything
//! here is plain data; the JSON shape is what downstream overlays consume.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::stats::RunningStats;

/// A single heart-rate reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub value: u32,
    /// Capture instant, serialized as Unix milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

impl Sample {
    /// A sample captured now.
    pub fn new(value: u32) -> Self {
        Self::at(value, Utc::now())
    }

    pub fn at(value: u32, at: DateTime<Utc>) -> Self {
        Self { value, at }
    }
}

/// Lifecycle of the upstream connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle of the presence channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityState {
    #[default]
    Uninitialized,
    Connecting,
    Ready,
    /// The platform offers no transport for the channel.
    Unavailable,
}

/// # Status Snapshot
///
/// Read-only projection built on demand for status broadcasts and the
/// `/status` endpoint. Stats fields are flattened next to the toggles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub streaming_enabled: bool,
    pub activity_enabled: bool,
    pub connection: ConnectionState,
    pub connected: bool,
    pub activity: ActivityState,
    #[serde(flatten)]
    pub stats: RunningStats,
}

impl StatusSnapshot {
    pub fn new(
        streaming_enabled: bool,
        activity_enabled: bool,
        connection: ConnectionState,
        activity: ActivityState,
        stats: RunningStats,
    ) -> Self {
        Self {
            streaming_enabled,
            activity_enabled,
            connection,
            connected: connection == ConnectionState::Connected,
            activity,
            stats,
        }
    }
}

/// A sample together with the stats it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleUpdate {
    pub hr: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
    pub stats: RunningStats,
}

impl SampleUpdate {
    pub fn new(sample: &Sample, stats: &RunningStats) -> Self {
        Self {
            hr: sample.value,
            at: sample.at,
            stats: stats.clone(),
        }
    }
}

/// The frame the dispatcher fans out. Tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubMessage {
    Sample(SampleUpdate),
    Status(StatusSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sample_message_wire_shape() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let mut stats = RunningStats::default();
        stats.last = Some(72);
        let message = HubMessage::Sample(SampleUpdate::new(&Sample::at(72, at), &stats));

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "sample");
        assert_eq!(json["hr"], 72);
        assert_eq!(json["at"], 1_700_000_000_123i64);
        assert_eq!(json["stats"]["last"], 72);
        assert!(json["stats"]["avg"].is_null());
    }

    #[test]
    fn status_message_flattens_stats() {
        let snapshot = StatusSnapshot::new(
            true,
            false,
            ConnectionState::Connected,
            ActivityState::Uninitialized,
            RunningStats::default(),
        );
        let json = serde_json::to_value(HubMessage::Status(snapshot)).unwrap();

        assert_eq!(json["type"], "status");
        assert_eq!(json["connected"], true);
        assert_eq!(json["connection"], "connected");
        assert_eq!(json["streamingEnabled"], true);
        assert_eq!(json["activity"], "uninitialized");
        assert_eq!(json["count"], 0);
        assert!(json["min"].is_null());
    }
}
