//! # Pulsoid WSS Stream Client
//!
//! Keeps at most one connection to the realtime heart-rate endpoint and
//! turns it into a sequence of [`StreamEvent`]s.
//!
//! ## Lifecycle:
//! - `start()` resolves the endpoint from the current settings and begins a
//!   connection attempt, unless streaming is off, the token is missing, or a
//!   connection (or attempt) already exists.
//! - A successful open resets the backoff and yields `Status(Connected)`.
//! - Every valid frame yields exactly one `Sample`; malformed frames are
//!   dropped at the parse boundary.
//! - A failed attempt, a transport error or a remote close drops the socket,
//!   yields `Status(Disconnected)` and arms the reconnect timer with the
//!   current backoff delay (while streaming stays enabled).
//! - `stop()` drops the connection or attempt and disarms the timer.
//!
//! The client is a polled state machine: the owner drives it with
//! [`StreamClient::next_event`], typically inside a `tokio::select!`. All
//! state lives in the struct, so dropping a pending `next_event` loses nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{sleep, Sleep};

use crate::configs::{Settings, SettingsProvider};
use crate::core::model::{ConnectionState, Sample};

use super::backoff::{Backoff, DEFAULT_BACKOFF_CAP, DEFAULT_BACKOFF_FLOOR};
use super::connector::{ConnectFuture, Connector, FrameStream, TransportError};
use super::frame::parse_frame;

/// Timing knobs of the stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub backoff_floor: Duration,
    pub backoff_cap: Duration,
    /// Upper bound for a single connection attempt (TCP + TLS + upgrade).
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff_floor: DEFAULT_BACKOFF_FLOOR,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// What the stream client reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Sample(Sample),
    Status(ConnectionState),
}

enum Link {
    Idle,
    Connecting(ConnectFuture),
    Open(FrameStream),
}

enum Step {
    Attempt(Result<FrameStream, TransportError>),
    Frame(Option<Result<super::frame::Frame, TransportError>>),
}

pub struct StreamClient<C> {
    connector: C,
    settings: Arc<dyn SettingsProvider>,
    config: StreamConfig,
    link: Link,
    state: ConnectionState,
    backoff: Backoff,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl<C: Connector> StreamClient<C> {
    pub fn new(connector: C, settings: Arc<dyn SettingsProvider>, config: StreamConfig) -> Self {
        let backoff = Backoff::new(config.backoff_floor, config.backoff_cap);
        Self {
            connector,
            settings,
            config,
            link: Link::Idle,
            state: ConnectionState::Disconnected,
            backoff,
            reconnect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Delay the next scheduled reconnect would use.
    pub fn current_backoff(&self) -> Duration {
        self.backoff.peek()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// # Start
    ///
    /// Begins a connection attempt. Returns `false` (and does nothing) when
    /// streaming is disabled, a connection or attempt already exists, or the
    /// endpoint cannot be resolved from the settings.
    pub fn start(&mut self) -> bool {
        let settings = self.settings.snapshot();
        if !settings.streaming_enabled {
            log::debug!("Streaming disabled; start ignored.");
            return false;
        }
        if !matches!(self.link, Link::Idle) {
            log::debug!("Stream connection already exists; start ignored.");
            return false;
        }
        self.begin_connect(&settings)
    }

    /// # Stop
    ///
    /// Drops the active connection or pending attempt and disarms the
    /// reconnect timer. Returns `true` only if something was torn down.
    pub fn stop(&mut self) -> bool {
        let had_link = !matches!(self.link, Link::Idle);
        let had_timer = self.reconnect.take().is_some();

        self.link = Link::Idle;
        self.state = ConnectionState::Disconnected;

        if had_link || had_timer {
            log::info!("Stream client stopped.");
        }
        had_link || had_timer
    }

    /// Waits for the next event. Pends forever while idle with nothing
    /// scheduled, so it is meant to sit in a `select!` next to other work.
    pub async fn next_event(&mut self) -> StreamEvent {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<StreamEvent> {
        loop {
            if let Some(timer) = self.reconnect.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    self.reconnect = None;
                    self.on_reconnect_timer();
                    continue;
                }
            }

            let step = match &mut self.link {
                Link::Idle => return Poll::Pending,
                Link::Connecting(attempt) => match attempt.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => Step::Attempt(result),
                },
                Link::Open(frames) => match frames.poll_next_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(next) => Step::Frame(next),
                },
            };

            match step {
                Step::Attempt(Ok(frames)) => {
                    self.link = Link::Open(frames);
                    self.state = ConnectionState::Connected;
                    self.backoff.reset();
                    log::info!("Connected to stream endpoint.");
                    return Poll::Ready(StreamEvent::Status(ConnectionState::Connected));
                }
                Step::Attempt(Err(e)) => {
                    log::error!("Failed to connect to stream endpoint: {}", e);
                    return Poll::Ready(self.on_closed());
                }
                Step::Frame(Some(Ok(frame))) => match parse_frame(&frame) {
                    Ok(value) => return Poll::Ready(StreamEvent::Sample(Sample::new(value))),
                    Err(e) => log::debug!("Dropped frame {:?}: {}", frame, e),
                },
                Step::Frame(Some(Err(e))) => {
                    log::error!("Stream read error: {}", e);
                    return Poll::Ready(self.on_closed());
                }
                Step::Frame(None) => {
                    log::warn!("Stream closed by remote host.");
                    return Poll::Ready(self.on_closed());
                }
            }
        }
    }

    fn begin_connect(&mut self, settings: &Settings) -> bool {
        let url = match settings.endpoint_url() {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Not connecting to stream endpoint: {}", e);
                return false;
            }
        };

        log::info!("Connecting to stream endpoint {}", redact(&url));
        let attempt = self.connector.connect(&url);
        let limit = self.config.connect_timeout;
        self.link = Link::Connecting(Box::pin(async move {
            match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit)),
            }
        }));
        self.state = ConnectionState::Connecting;
        true
    }

    /// The socket is already dropped when this runs; it only records the
    /// state change and arms the reconnect timer.
    fn on_closed(&mut self) -> StreamEvent {
        self.link = Link::Idle;
        self.state = ConnectionState::Disconnected;

        if self.settings.snapshot().streaming_enabled {
            let delay = self.backoff.next_delay();
            log::info!("Reconnecting to stream endpoint in {} ms.", delay.as_millis());
            self.reconnect = Some(Box::pin(sleep(delay)));
        }

        StreamEvent::Status(ConnectionState::Disconnected)
    }

    fn on_reconnect_timer(&mut self) {
        if !matches!(self.link, Link::Idle) {
            log::debug!("Reconnect timer fired with a connection in place; skipped.");
            return;
        }
        let settings = self.settings.snapshot();
        if settings.streaming_enabled {
            self.begin_connect(&settings);
        }
    }
}

/// Endpoint without its query string, which carries the access token.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
