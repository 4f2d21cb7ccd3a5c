//! # lib_pulse
//!
//! Shared library for the heart-rate relay. Every folder is a feature-gated
//! module; `full` (the default) turns all of them on.
//!
//! - **`configs`**: runtime settings and endpoint resolution.
//! - **`core`**: samples, running stats, status snapshots, the sink dispatcher.
//! - **`ingestors`**: the reconnecting WebSocket stream client.
//! - **`activity`**: rate-limited presence updates over Discord local RPC.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "activity")]
pub mod activity;
