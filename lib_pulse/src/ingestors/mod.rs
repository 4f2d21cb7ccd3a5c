//! # Ingestors Module
//!
//! Upstream side of the relay: everything between the realtime WebSocket
//! endpoint and a parsed [`crate::core::Sample`].
//!
//! ## Submodules:
//! - **`frame`**: payload parsing (bare decimal or JSON `data.heart_rate`).
//! - **`backoff`**: the capped exponential reconnect delay.
//! - **`connector`**: the transport seam and its `tokio-tungstenite` implementation.
//! - **`pulsoid_wss`**: the reconnecting stream client state machine.

pub mod backoff;
pub mod connector;
pub mod frame;
pub mod pulsoid_wss;

// --- Public API Re-exports ---
pub use backoff::Backoff;
pub use connector::{Connector, TransportError, WsConnector};
pub use frame::{parse_frame, Frame, PayloadError};
pub use pulsoid_wss::{StreamClient, StreamConfig, StreamEvent};
