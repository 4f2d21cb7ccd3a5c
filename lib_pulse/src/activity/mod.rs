//! # Activity Module
//!
//! Rich-presence style status broadcast.
//!
//! - **`notifier`**: the rate-limited [`ActivityNotifier`] and the
//!   [`ActivityChannel`] / [`ChannelFactory`] seams it drives.
//! - **`discord_ipc`**: the Discord local RPC implementation of those seams.

pub mod discord_ipc;
pub mod notifier;

// --- Public API Re-exports ---
pub use discord_ipc::{DiscordIpc, DiscordIpcFactory};
pub use notifier::{ActivityChannel, ActivityError, ActivityNotifier, ChannelFactory, NotifyOutcome};
