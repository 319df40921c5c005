//! In-process data channel pair.
//!
//! Each endpoint queues frames for a pump task that delivers them to the
//! peer's event stream. Bytes count as buffered from `send` until the pump
//! hands the frame over, so a slow reader (or configured latency) pushes the
//! buffered amount up the same way a congested network path would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use peerdrop_transfer::{DataChannel, EventReceiver, TransportError, TransportEvent};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace, warn};

/// Default capacity of each endpoint's event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Tuning for a loopback pair.
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Capacity of each endpoint's event stream.
    pub event_capacity: usize,
    /// Delay applied to every frame before delivery.
    pub latency: Option<Duration>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            latency: None,
        }
    }
}

enum Command {
    Frame(Vec<u8>),
    Close,
    Fail(String),
}

/// Outgoing queue accounting for one endpoint.
#[derive(Default)]
struct Outbox {
    buffered: AtomicUsize,
    drained: Notify,
    frames_sent: AtomicU64,
    fail_after: AtomicU64,
}

/// One end of a loopback pair.
pub struct LoopbackChannel {
    commands: mpsc::UnboundedSender<Command>,
    outbox: Arc<Outbox>,
    closed: Arc<AtomicBool>,
}

impl LoopbackChannel {
    /// Creates two connected endpoints with their event streams.
    ///
    /// Both streams start with [`TransportEvent::Opened`]. Must be called
    /// inside a tokio runtime.
    pub fn pair(
        options: LoopbackOptions,
    ) -> ((LoopbackChannel, EventReceiver), (LoopbackChannel, EventReceiver)) {
        let capacity = options.event_capacity.max(2);
        let (a_events_tx, a_events_rx) = mpsc::channel(capacity);
        let (b_events_tx, b_events_rx) = mpsc::channel(capacity);
        let closed = Arc::new(AtomicBool::new(false));

        let _ = a_events_tx.try_send(TransportEvent::Opened);
        let _ = b_events_tx.try_send(TransportEvent::Opened);

        let a = Self::endpoint(
            &options,
            Arc::clone(&closed),
            a_events_tx.clone(),
            b_events_tx.clone(),
        );
        let b = Self::endpoint(&options, closed, b_events_tx, a_events_tx);

        debug!("loopback channel pair opened");
        ((a, a_events_rx), (b, b_events_rx))
    }

    fn endpoint(
        options: &LoopbackOptions,
        closed: Arc<AtomicBool>,
        own_events: mpsc::Sender<TransportEvent>,
        peer_events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Outbox {
            fail_after: AtomicU64::new(u64::MAX),
            ..Outbox::default()
        });

        tokio::spawn(pump(
            rx,
            Arc::clone(&outbox),
            Arc::clone(&closed),
            own_events,
            peer_events,
            options.latency,
        ));

        Self {
            commands,
            outbox,
            closed,
        }
    }

    /// Fails the channel after `frames` more successful sends: the next send
    /// is refused and both ends receive an error event.
    pub fn fail_after(&self, frames: u64) {
        let limit = self.frames_sent().saturating_add(frames);
        self.outbox.fail_after.store(limit, Ordering::SeqCst);
    }

    /// Reports `reason` as a channel error on both ends once the frames
    /// already queued have been delivered. Later sends are refused.
    pub fn inject_error(&self, reason: impl Into<String>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Fail(reason.into()));
        }
        self.outbox.drained.notify_waiters();
    }

    /// Frames accepted by [`send`](DataChannel::send) so far.
    pub fn frames_sent(&self) -> u64 {
        self.outbox.frames_sent.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DataChannel for LoopbackChannel {
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let sent = self.outbox.frames_sent.load(Ordering::SeqCst);
        if sent >= self.outbox.fail_after.load(Ordering::SeqCst) {
            warn!(frames = sent, "loopback channel failing as configured");
            self.inject_error("injected failure");
            return Err(TransportError::Failed("injected failure".into()));
        }

        let len = frame.len();
        self.outbox.buffered.fetch_add(len, Ordering::SeqCst);
        if self.commands.send(Command::Frame(frame)).is_err() {
            self.outbox.buffered.fetch_sub(len, Ordering::SeqCst);
            return Err(TransportError::Closed);
        }
        self.outbox.frames_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.outbox.buffered.load(Ordering::SeqCst)
    }

    async fn buffered_amount_low(&self, threshold: usize) {
        loop {
            let drained = self.outbox.drained.notified();
            if self.buffered_amount() <= threshold || self.is_closed() {
                return;
            }
            drained.await;
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("loopback channel closing");
            let _ = self.commands.send(Command::Close);
        }
        self.outbox.drained.notify_waiters();
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(
    mut commands: mpsc::UnboundedReceiver<Command>,
    outbox: Arc<Outbox>,
    closed: Arc<AtomicBool>,
    own_events: mpsc::Sender<TransportEvent>,
    peer_events: mpsc::Sender<TransportEvent>,
    latency: Option<Duration>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Frame(frame) => {
                if let Some(latency) = latency {
                    tokio::time::sleep(latency).await;
                }
                let len = frame.len();
                let delivered = peer_events.send(TransportEvent::Message(frame)).await;
                outbox.buffered.fetch_sub(len, Ordering::SeqCst);
                outbox.drained.notify_waiters();

                if delivered.is_err() {
                    debug!("peer event stream dropped, closing loopback channel");
                    closed.store(true, Ordering::SeqCst);
                    let _ = own_events.send(TransportEvent::Closed).await;
                    break;
                }
                trace!(len, "frame delivered");
            }
            Command::Close => {
                let _ = peer_events.send(TransportEvent::Closed).await;
                let _ = own_events.send(TransportEvent::Closed).await;
                break;
            }
            Command::Fail(reason) => {
                let _ = peer_events.send(TransportEvent::Error(reason.clone())).await;
                let _ = own_events.send(TransportEvent::Error(reason)).await;
                break;
            }
        }
    }

    // Frames still queued are never delivered.
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Frame(frame) = command {
            outbox.buffered.fetch_sub(frame.len(), Ordering::SeqCst);
        }
    }
    outbox.drained.notify_waiters();
}
