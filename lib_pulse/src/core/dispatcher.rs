//! # Sink Dispatcher
//!
//! Fans a sample update or a status snapshot out to every registered sink.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: each broadcast builds one `Arc<HubMessage>`.
//!     Channel-backed sinks receive a clone of the pointer, not of the data.
//!
//! 2.  **Best-Effort Delivery**: sinks are independent. A sink that fails is
//!     logged and skipped; a sink that reports [`SinkError::Closed`] is pruned
//!     from the registry. Nothing is retried, queued or replayed, and nothing
//!     is raised to the caller: the outcome comes back as a [`DeliveryReport`].
//!
//! 3.  **Short Critical Section**: the registry lock is held only to copy the
//!     current membership or to edit it, never while a sink runs, so a sink may
//!     register or deregister others from inside its own delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;

use super::model::{HubMessage, SampleUpdate, StatusSnapshot};

#[derive(Debug, Error)]
pub enum SinkError {
    /// The consumer is gone; the dispatcher drops the registration.
    #[error("sink is closed")]
    Closed,

    #[error("sink rejected the update: {0}")]
    Rejected(String),
}

/// A registered consumer of broadcast updates.
pub trait Sink: Send + Sync {
    fn receive_sample(&self, update: &SampleUpdate) -> Result<(), SinkError>;

    fn receive_status(&self, snapshot: &StatusSnapshot) -> Result<(), SinkError>;

    /// Frame-level entry point used by the dispatcher. Sinks that forward the
    /// shared frame as-is override this to avoid copying it.
    fn receive(&self, message: &Arc<HubMessage>) -> Result<(), SinkError> {
        match message.as_ref() {
            HubMessage::Sample(update) => self.receive_sample(update),
            HubMessage::Status(snapshot) => self.receive_status(snapshot),
        }
    }
}

/// Registry key returned by [`Dispatcher::add_sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Closed sinks removed from the registry by this broadcast.
    pub pruned: usize,
}

/// # Channel Sink
///
/// Forwards frames into an unbounded MPSC channel. Sends only fail once the
/// receiver is dropped, which is reported as [`SinkError::Closed`].
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Arc<HubMessage>>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<Arc<HubMessage>>) -> Self {
        Self { sender }
    }
}

impl Sink for ChannelSink {
    fn receive_sample(&self, update: &SampleUpdate) -> Result<(), SinkError> {
        self.receive(&Arc::new(HubMessage::Sample(update.clone())))
    }

    fn receive_status(&self, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        self.receive(&Arc::new(HubMessage::Status(snapshot.clone())))
    }

    fn receive(&self, message: &Arc<HubMessage>) -> Result<(), SinkError> {
        self.sender.send(Arc::clone(message)).map_err(|_| SinkError::Closed)
    }
}

struct SinkHandle {
    id: SinkId,
    /// Human-readable name for logs, e.g. the peer address of a WebSocket session.
    label: String,
    sink: Arc<dyn Sink>,
}

/// # Core Dispatcher
///
/// Manages the registration, deregistration, and broadcasting of updates to
/// all sinks.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Mutex<Vec<SinkHandle>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink`; it receives every broadcast made from now on.
    pub fn add_sink(&self, label: &str, sink: Arc<dyn Sink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(SinkHandle {
            id,
            label: label.to_string(),
            sink,
        });
        log::info!("Sink '{}' registered", label);
        id
    }

    /// # Add Client
    ///
    /// Registers a [`ChannelSink`] and hands back the receiving half. Dropping
    /// the receiver is enough to unregister: the next broadcast prunes it.
    pub fn add_client(&self, label: &str) -> (SinkId, mpsc::UnboundedReceiver<Arc<HubMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add_sink(label, Arc::new(ChannelSink::new(tx)));
        (id, rx)
    }

    /// Removes a sink. Returns `false` if it was already gone.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        let mut sinks = self.lock();
        match sinks.iter().position(|handle| handle.id == id) {
            Some(index) => {
                let handle = sinks.swap_remove(index);
                log::info!("Sink '{}' explicitly removed.", handle.label);
                true
            }
            None => false,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.lock().len()
    }

    pub fn broadcast_sample(&self, update: SampleUpdate) -> DeliveryReport {
        self.broadcast(Arc::new(HubMessage::Sample(update)))
    }

    pub fn broadcast_status(&self, snapshot: StatusSnapshot) -> DeliveryReport {
        self.broadcast(Arc::new(HubMessage::Status(snapshot)))
    }

    /// # Broadcast
    ///
    /// 1.  Copies the current membership under the lock.
    /// 2.  Delivers the shared frame to each sink independently.
    /// 3.  Prunes the sinks that reported [`SinkError::Closed`].
    ///
    /// Sinks registered after step 1 miss this frame.
    pub fn broadcast(&self, message: Arc<HubMessage>) -> DeliveryReport {
        let targets: Vec<(SinkId, String, Arc<dyn Sink>)> = self
            .lock()
            .iter()
            .map(|handle| (handle.id, handle.label.clone(), Arc::clone(&handle.sink)))
            .collect();

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        for (id, label, sink) in targets {
            match sink.receive(&message) {
                Ok(()) => report.delivered += 1,
                Err(SinkError::Closed) => {
                    log::info!("Sink '{}' disconnected. Removing from dispatcher.", label);
                    closed.push(id);
                }
                Err(e) => {
                    log::warn!("Delivery to sink '{}' failed: {}", label, e);
                    report.failed += 1;
                }
            }
        }

        if !closed.is_empty() {
            let mut sinks = self.lock();
            let before = sinks.len();
            sinks.retain(|handle| !closed.contains(&handle.id));
            report.pruned = before - sinks.len();
        }

        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkHandle>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
