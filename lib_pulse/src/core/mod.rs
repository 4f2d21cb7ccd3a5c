//! # Core Pipeline Module
//!
//! The pieces every sample passes through after it leaves the stream client.
//!
//! - **`model`**: `Sample`, `ConnectionState`, `StatusSnapshot` and the
//!   `HubMessage` frame sent to sinks.
//! - **`stats`**: the incremental `StatsAggregator`.
//! - **`dispatcher`**: the best-effort, zero-copy fan-out to registered sinks.

/// Samples, status snapshots and broadcast frames.
pub mod model;
/// Incremental running statistics.
pub mod stats;
/// The sink registry and broadcaster.
pub mod dispatcher;

// --- Public API Re-exports ---
pub use dispatcher::{ChannelSink, DeliveryReport, Dispatcher, Sink, SinkError, SinkId};
pub use model::{ActivityState, ConnectionState, HubMessage, Sample, SampleUpdate, StatusSnapshot};
pub use stats::{RunningStats, StatsAggregator};
