//! # Activity Notifier
//!
//! Publishes the latest heart rate to an external presence channel, at most
//! once per `min_activity_interval`. The channel is optional: when it cannot be
//! created or its login fails the notifier stays quiet and the rest of the
//! pipeline carries on.
//!
//! Each channel lives on its own task, which logs in, then applies the latest
//! activity handed over through a `watch` channel. Nothing on the notifier
//! waits for channel I/O, so a wedged presence client only delays itself;
//! updates queued meanwhile collapse into the most recent one.
//!
//! ## States:
//! - **Uninitialized**: nothing open (disabled, torn down, login failed, or
//!   the channel task ended after losing its link).
//! - **Connecting**: the channel task is logging in;
//!   [`ActivityNotifier::login_complete`] resolves when it finishes.
//! - **Ready**: updates are accepted, subject to the rate gate.
//! - **Unavailable**: the platform offers no transport; `ensure()` retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::configs::SettingsProvider;
use crate::core::model::{ActivityState, Sample};

/// Activity title shown above the reading.
pub const ACTIVITY_DETAILS: &str = "Heart rate";

/// Published right after login, before the first sample arrives.
pub const ACTIVITY_WAITING: &str = "Waiting for data…";

/// Upper bound for any single channel call.
pub const DEFAULT_ACTIVITY_IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Activity transport unavailable: {0}")]
    Unavailable(String),

    #[error("Activity channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Activity payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Activity request rejected: {0}")]
    Rejected(String),

    #[error("Unexpected activity message: {0}")]
    Protocol(String),

    #[error("Activity channel is not open")]
    NotOpen,

    #[error("Activity call timed out after {0:?}")]
    Timeout(Duration),
}

impl ActivityError {
    /// The channel can no longer carry updates; only a new login helps.
    pub fn is_link_lost(&self) -> bool {
        matches!(self, ActivityError::Io(_) | ActivityError::NotOpen)
    }
}

/// # Activity Channel
///
/// A presence client. `open` resolves once the remote side reports ready.
pub trait ActivityChannel: Send + 'static {
    fn open<'a>(&'a mut self, client_id: &'a str) -> BoxFuture<'a, Result<(), ActivityError>>;

    fn set_state<'a>(
        &'a mut self,
        details: &'a str,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), ActivityError>>;

    fn clear(&mut self) -> BoxFuture<'_, Result<(), ActivityError>>;

    fn close(&mut self) -> BoxFuture<'_, Result<(), ActivityError>>;
}

/// Creates unopened channels. `Err(ActivityError::Unavailable)` means the
/// platform has no transport for one right now.
pub trait ChannelFactory: Send + Sync {
    type Channel: ActivityChannel;

    fn create(&self) -> Result<Self::Channel, ActivityError>;
}

/// Result of a single [`ActivityNotifier::notify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Disabled, or no channel is ready.
    NotReady,
    /// Inside the interval window of an earlier accepted call.
    Throttled,
    /// Handed to the channel task. Update failures are logged there.
    Queued,
    /// The channel task had ended; the notifier is back to Uninitialized.
    Lost,
}

type LoginResult = Result<(), ActivityError>;

struct Link {
    updates: watch::Sender<String>,
    task: JoinHandle<()>,
}

enum Slot {
    Uninitialized,
    Unavailable,
    Connecting(Link, oneshot::Receiver<LoginResult>),
    Ready(Link),
}

pub struct ActivityNotifier<F: ChannelFactory> {
    factory: F,
    settings: Arc<dyn SettingsProvider>,
    io_timeout: Duration,
    slot: Slot,
    last_update: Option<Instant>,
    closing: Option<JoinHandle<()>>,
}

impl<F: ChannelFactory> ActivityNotifier<F> {
    pub fn new(factory: F, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            factory,
            settings,
            io_timeout: DEFAULT_ACTIVITY_IO_TIMEOUT,
            slot: Slot::Uninitialized,
            last_update: None,
            closing: None,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn state(&self) -> ActivityState {
        match self.slot {
            Slot::Uninitialized => ActivityState::Uninitialized,
            Slot::Unavailable => ActivityState::Unavailable,
            Slot::Connecting(..) => ActivityState::Connecting,
            Slot::Ready(_) => ActivityState::Ready,
        }
    }

    /// # Ensure
    ///
    /// Brings the channel up if activity is enabled and a client id is set;
    /// otherwise tears down whatever is open. A running login or an open
    /// channel is left alone. The login runs on the channel task; its result
    /// is picked up by [`Self::login_complete`].
    pub fn ensure(&mut self) -> ActivityState {
        let settings = self.settings.snapshot();
        let client_id = match settings.activity_client_id() {
            Some(id) if settings.activity_enabled => id.to_string(),
            _ => {
                self.teardown();
                return self.state();
            }
        };

        if matches!(self.slot, Slot::Connecting(..) | Slot::Ready(_)) {
            return self.state();
        }

        let channel = match self.factory.create() {
            Ok(channel) => channel,
            Err(e) => {
                log::info!("Activity channel not available: {}", e);
                self.slot = Slot::Unavailable;
                return self.state();
            }
        };

        log::info!("Logging in to activity channel.");
        let (done, pending) = oneshot::channel();
        let (updates, latest) = watch::channel(ACTIVITY_WAITING.to_string());
        let task = tokio::spawn(run_channel(channel, client_id, self.io_timeout, done, latest));
        self.slot = Slot::Connecting(Link { updates, task }, pending);
        self.state()
    }

    /// Resolves when the running login finishes; pends forever otherwise.
    /// Safe to use as a `select!` branch.
    pub async fn login_complete(&mut self) -> ActivityState {
        let Slot::Connecting(_, pending) = &mut self.slot else {
            return std::future::pending().await;
        };
        let result = pending.await;

        self.slot = match (std::mem::replace(&mut self.slot, Slot::Uninitialized), result) {
            (Slot::Connecting(link, _), Ok(Ok(()))) => {
                log::info!("Activity channel ready.");
                Slot::Ready(link)
            }
            (_, Ok(Err(_))) => Slot::Uninitialized,
            (_, Err(_)) => {
                log::warn!("Activity login task ended without a result.");
                Slot::Uninitialized
            }
            (other, Ok(Ok(()))) => other,
        };
        self.state()
    }

    /// # Notify
    ///
    /// Hands `sample` to the channel task unless the previous accepted call is
    /// younger than the configured interval. The first call in a window wins;
    /// an update that later fails still started its window.
    pub fn notify(&mut self, sample: &Sample) -> NotifyOutcome {
        let settings = self.settings.snapshot();
        if !settings.activity_enabled {
            return NotifyOutcome::NotReady;
        }
        let Slot::Ready(link) = &self.slot else {
            return NotifyOutcome::NotReady;
        };

        let now = Instant::now();
        if let Some(last) = self.last_update {
            if now.duration_since(last) < settings.min_activity_interval() {
                return NotifyOutcome::Throttled;
            }
        }
        self.last_update = Some(now);

        if link.updates.send(format!("❤ {} bpm", sample.value)).is_err() {
            log::warn!("Activity channel task has ended; dropping the channel.");
            self.slot = Slot::Uninitialized;
            return NotifyOutcome::Lost;
        }
        NotifyOutcome::Queued
    }

    /// # Teardown
    ///
    /// Releases the channel: the channel task clears and closes it in the
    /// background (errors are logged and dropped), or closes it after a
    /// running login. Returns `true` if anything was torn down.
    pub fn teardown(&mut self) -> bool {
        let link = match std::mem::replace(&mut self.slot, Slot::Uninitialized) {
            Slot::Ready(link) => {
                log::info!("Closing activity channel.");
                link
            }
            Slot::Connecting(link, _) => {
                log::info!("Activity login abandoned.");
                link
            }
            Slot::Uninitialized | Slot::Unavailable => return false,
        };
        drop(link.updates);
        self.closing = Some(link.task);
        true
    }

    /// Waits for the most recently torn down channel to finish closing.
    pub async fn closed(&mut self) {
        if let Some(task) = self.closing.take() {
            if let Err(e) = task.await {
                log::warn!("Activity channel task failed: {}", e);
            }
        }
    }
}

async fn run_channel<C: ActivityChannel>(
    mut channel: C,
    client_id: String,
    io_timeout: Duration,
    done: oneshot::Sender<LoginResult>,
    mut latest: watch::Receiver<String>,
) {
    if let Err(e) = bounded(io_timeout, channel.open(&client_id)).await {
        log::warn!("Activity login failed: {}", e);
        if let Err(e) = bounded(io_timeout, channel.close()).await {
            log::debug!("Activity close after failed login: {}", e);
        }
        let _ = done.send(Err(e));
        return;
    }

    if let Err(e) = bounded(io_timeout, channel.set_state(ACTIVITY_DETAILS, ACTIVITY_WAITING)).await {
        log::warn!("Initial activity update failed: {}", e);
    }

    if done.send(Ok(())).is_err() {
        log::debug!("Activity login finished after teardown; closing.");
        let _ = bounded(io_timeout, channel.close()).await;
        return;
    }

    // Ends when the notifier drops the sender.
    while latest.changed().await.is_ok() {
        let state = latest.borrow_and_update().clone();
        match bounded(io_timeout, channel.set_state(ACTIVITY_DETAILS, &state)).await {
            Ok(()) => log::debug!("Activity set to {}.", state),
            Err(e) if e.is_link_lost() => {
                log::warn!("Activity channel lost: {}", e);
                let _ = bounded(io_timeout, channel.close()).await;
                return;
            }
            Err(e) => log::warn!("Activity update failed: {}", e),
        }
    }

    if let Err(e) = bounded(io_timeout, channel.clear()).await {
        log::debug!("Activity clear failed: {}", e);
    }
    if let Err(e) = bounded(io_timeout, channel.close()).await {
        log::debug!("Activity close failed: {}", e);
    }
    log::info!("Activity channel closed.");
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ActivityError>>,
) -> Result<T, ActivityError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ActivityError::Timeout(limit))?
}
