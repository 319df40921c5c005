//! Per-transfer session state machine.
//!
//! A [`Session`] owns its descriptors, its batch and its state. Local API
//! calls drive negotiation; everything the transport reports goes through
//! [`Session::handle_transport_event`]. The channel itself is never owned
//! here.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use peerdrop_protocol::{Role, SessionDescriptor, WireMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunked::ChunkedSender;
use crate::config::TransferConfig;
use crate::error::{ErrorKind, Failure, ProtocolErrorKind, TransferError};
use crate::progress::SpeedCalculator;
use crate::reassembly::{ReceiveOutcome, Reassembler};
use crate::transport::TransportEvent;
use crate::types::{
    CompletedItem, SessionEvent, SessionState, Side, TransferItem, TransferProgress,
};

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Set of live session ids shared between sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    live: Arc<Mutex<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims `id`, failing if another live session holds it.
    pub fn claim(&self, id: &str) -> Result<SessionClaim, TransferError> {
        if !self.lock().insert(id.to_string()) {
            return Err(TransferError::DuplicateSession(id.to_string()));
        }
        Ok(SessionClaim {
            id: id.to_string(),
            live: Arc::clone(&self.live),
        })
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Holds a session id in a [`SessionRegistry`] until dropped.
#[derive(Debug)]
pub struct SessionClaim {
    id: String,
    live: Arc<Mutex<HashSet<String>>>,
}

impl SessionClaim {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Batch {
    Sender(Arc<[TransferItem]>),
    Receiver {
        reassembler: Reassembler,
        completed: Option<Vec<CompletedItem>>,
    },
}

/// Last position that moved across the channel.
#[derive(Debug, Clone, Copy, Default)]
struct Position {
    item_index: Option<usize>,
    offset: u64,
}

/// One transfer between two peers.
#[derive(Debug)]
pub struct Session {
    side: Side,
    config: TransferConfig,
    state: SessionState,
    local: Option<SessionDescriptor>,
    remote: Option<SessionDescriptor>,
    batch: Batch,
    failure: Option<Failure>,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<SessionEvent>>,
    registry: Option<SessionRegistry>,
    claim: Option<SessionClaim>,
    speed: SpeedCalculator,
    position: Position,
    transferred: u64,
}

impl Session {
    /// Creates the sending side for `items`.
    pub fn sender(config: TransferConfig, items: impl Into<Arc<[TransferItem]>>) -> Self {
        Self::new(Side::Sender, config, Batch::Sender(items.into()))
    }

    /// Creates the receiving side.
    pub fn receiver(config: TransferConfig) -> Self {
        let reassembler = Reassembler::new(config.strict_offsets);
        Self::new(
            Side::Receiver,
            config,
            Batch::Receiver {
                reassembler,
                completed: None,
            },
        )
    }

    fn new(side: Side, config: TransferConfig, batch: Batch) -> Self {
        Self {
            side,
            config,
            state: SessionState::Idle,
            local: None,
            remote: None,
            batch,
            failure: None,
            cancel: CancellationToken::new(),
            events: None,
            registry: None,
            claim: None,
            speed: SpeedCalculator::default(),
            position: Position::default(),
            transferred: 0,
        }
    }

    /// Sends [`SessionEvent`]s to `tx`. Events are dropped when it is full.
    pub fn with_events(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Registers the session id in `registry` once it is known.
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Creates an event channel of `capacity` and returns its receiver.
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.events = Some(tx);
        rx
    }

    // -- accessors ----------------------------------------------------------

    /// Session id, known once an offer was created or applied.
    pub fn id(&self) -> Option<&str> {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map(SessionDescriptor::session_id)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Why the session failed, if it did.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn local_descriptor(&self) -> Option<&SessionDescriptor> {
        self.local.as_ref()
    }

    pub fn remote_descriptor(&self) -> Option<&SessionDescriptor> {
        self.remote.as_ref()
    }

    /// Items being sent. `None` on the receiving side.
    pub fn items(&self) -> Option<&Arc<[TransferItem]>> {
        match &self.batch {
            Batch::Sender(items) => Some(items),
            Batch::Receiver { .. } => None,
        }
    }

    /// Received items, once. `None` before completion or on the sender.
    pub fn take_completed_items(&mut self) -> Option<Vec<CompletedItem>> {
        match &mut self.batch {
            Batch::Receiver { completed, .. } => completed.take(),
            Batch::Sender(_) => None,
        }
    }

    /// Token cancelled when the session fails. Cancelling it aborts a
    /// running driver.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred
    }

    pub fn total_bytes(&self) -> u64 {
        match &self.batch {
            Batch::Sender(items) => items.iter().map(TransferItem::size).sum(),
            Batch::Receiver { reassembler, .. } => reassembler.total_bytes(),
        }
    }

    /// Recent throughput in bytes/second.
    pub fn throughput(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    /// Estimated time until the batch is done.
    pub fn eta(&self) -> Option<Duration> {
        self.speed
            .eta(self.total_bytes().saturating_sub(self.transferred))
    }

    // -- negotiation --------------------------------------------------------

    /// Sender: records the local offer around `blob`.
    pub fn create_offer(
        &mut self,
        blob: impl Into<String>,
    ) -> Result<SessionDescriptor, TransferError> {
        self.expect(Side::Sender, SessionState::Idle, "create an offer")?;

        let offer = SessionDescriptor::offer(blob);
        self.claim(offer.session_id())?;
        self.local = Some(offer.clone());
        self.transition(SessionState::OfferCreated);
        Ok(offer)
    }

    /// Applies the peer's descriptor: the offer on the receiver, the answer
    /// on the sender.
    ///
    /// Each role is accepted once and the session id must match the offer.
    pub fn apply_remote_descriptor(
        &mut self,
        descriptor: SessionDescriptor,
    ) -> Result<(), TransferError> {
        if self.remote.is_some() {
            return Err(TransferError::InvalidDescriptor(
                "remote descriptor already applied".into(),
            ));
        }

        match self.side {
            Side::Sender => {
                self.expect(Side::Sender, SessionState::OfferCreated, "apply an answer")?;
                if descriptor.role() != Role::Answer {
                    return Err(TransferError::InvalidDescriptor(format!(
                        "expected an answer, got an {}",
                        descriptor.role()
                    )));
                }
                if Some(descriptor.session_id()) != self.id() {
                    return Err(TransferError::InvalidDescriptor(format!(
                        "answer belongs to session {}",
                        descriptor.session_id()
                    )));
                }
                self.remote = Some(descriptor);
                self.transition(SessionState::Connecting);
            }
            Side::Receiver => {
                self.expect(Side::Receiver, SessionState::Idle, "apply an offer")?;
                if descriptor.role() != Role::Offer {
                    return Err(TransferError::InvalidDescriptor(format!(
                        "expected an offer, got an {}",
                        descriptor.role()
                    )));
                }
                self.claim(descriptor.session_id())?;
                debug!(session = %descriptor.session_id(), "remote offer applied");
                self.remote = Some(descriptor);
            }
        }
        Ok(())
    }

    /// Receiver: records the local answer around `blob`.
    pub fn create_answer(
        &mut self,
        blob: impl Into<String>,
    ) -> Result<SessionDescriptor, TransferError> {
        self.expect(Side::Receiver, SessionState::Idle, "create an answer")?;
        let Some(offer) = self.remote.as_ref() else {
            return Err(TransferError::InvalidTransition {
                action: "create an answer without an offer",
                state: self.state,
            });
        };

        let answer = SessionDescriptor::answer_to(offer, blob);
        self.local = Some(answer.clone());
        self.transition(SessionState::AwaitingRemote);
        Ok(answer)
    }

    /// Fails the session with `NegotiationTimeout` if the channel has not
    /// opened yet. Returns whether it did.
    pub fn expire_negotiation(&mut self, waited: Duration) -> bool {
        if !self.state.is_negotiating() {
            return false;
        }
        self.fail(&TransferError::NegotiationTimeout(waited));
        true
    }

    // -- transport events ---------------------------------------------------

    /// Applies one transport event.
    ///
    /// Returns the failure when the event ended the session. Events after
    /// a terminal state are ignored.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), Failure> {
        if self.state.is_terminal() {
            debug!(state = %self.state, ?event, "ignoring event on finished session");
            return Ok(());
        }

        let result = match event {
            TransportEvent::Opened => {
                self.on_opened();
                Ok(())
            }
            TransportEvent::Message(frame) => self.on_message(&frame),
            TransportEvent::Closed => Err(self.transport_failure("channel closed")),
            TransportEvent::Error(reason) => Err(self.transport_failure(&reason)),
        };

        result.map_err(|err| self.fail(&err))
    }

    fn on_opened(&mut self) {
        match self.state {
            SessionState::Connecting | SessionState::AwaitingRemote => {
                self.transition(SessionState::Open);
            }
            SessionState::Open | SessionState::Transferring => {
                debug!(state = %self.state, "duplicate open event");
            }
            state => {
                warn!(%state, "channel opened before negotiation finished");
            }
        }
    }

    fn on_message(&mut self, frame: &[u8]) -> Result<(), TransferError> {
        if !matches!(self.state, SessionState::Open | SessionState::Transferring) {
            return Err(TransferError::protocol(
                ProtocolErrorKind::UnexpectedMessage,
                None,
                format!("message while {}", self.state),
            ));
        }

        let Batch::Receiver {
            reassembler,
            completed,
        } = &mut self.batch
        else {
            return Err(TransferError::protocol(
                ProtocolErrorKind::UnexpectedMessage,
                None,
                "sender received a message",
            ));
        };

        let message = WireMessage::from_frame(frame)?;
        let before = reassembler.received_bytes();
        let outcome = reassembler.handle(message)?;

        match outcome {
            ReceiveOutcome::Announced { items } => {
                info!(
                    session = self.id_for_log(),
                    items = items.len(),
                    "receiving batch"
                );
            }
            ReceiveOutcome::Progress {
                progress,
                item_completed,
            } => {
                let name = item_completed
                    .then(|| reassembler.item_name(progress.item_index).map(str::to_string))
                    .flatten();
                let moved = reassembler.received_bytes().saturating_sub(before);
                self.note_progress(progress, moved);
                if let Some(name) = name {
                    self.emit(SessionEvent::ItemCompleted {
                        item_index: progress.item_index,
                        name,
                    });
                }
            }
            ReceiveOutcome::Completed(items) => {
                // Empty items never see a chunk; report them now.
                let empty: Vec<(usize, String)> = items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.bytes.is_empty())
                    .map(|(index, item)| (index, item.name.clone()))
                    .collect();
                *completed = Some(items);
                for (item_index, name) in empty {
                    self.emit(SessionEvent::ItemCompleted { item_index, name });
                }
                self.transition(SessionState::Completed);
            }
        }
        Ok(())
    }

    fn transport_failure(&self, reason: &str) -> TransferError {
        TransferError::TransportFailed {
            item_index: self.position.item_index,
            offset: self.position.offset,
            reason: reason.to_string(),
        }
    }

    // -- sending ------------------------------------------------------------

    /// Sender: builds the chunked sender once the channel is open.
    pub fn begin_sending(&self) -> Result<ChunkedSender, TransferError> {
        self.expect(Side::Sender, SessionState::Open, "start sending")?;
        match &self.batch {
            Batch::Sender(items) => Ok(ChunkedSender::new(Arc::clone(items), &self.config)),
            Batch::Receiver { .. } => Err(TransferError::InvalidTransition {
                action: "start sending",
                state: self.state,
            }),
        }
    }

    /// Sender: records a chunk handed to the channel.
    pub fn record_chunk_sent(&mut self, progress: TransferProgress) -> Result<(), TransferError> {
        if !matches!(self.state, SessionState::Open | SessionState::Transferring) {
            return Err(TransferError::InvalidTransition {
                action: "record a sent chunk",
                state: self.state,
            });
        }

        let moved = match self.position.item_index {
            Some(index) if index == progress.item_index => {
                progress.transferred_bytes.saturating_sub(self.position.offset)
            }
            _ => progress.transferred_bytes,
        };
        self.note_progress(progress, moved);

        if progress.transferred_bytes == progress.total_bytes
            && let Some(item) = self.items().and_then(|items| items.get(progress.item_index))
        {
            let name = item.name().to_string();
            self.emit(SessionEvent::ItemCompleted {
                item_index: progress.item_index,
                name,
            });
        }
        Ok(())
    }

    /// Sender: marks the batch as fully sent and releases the payloads.
    pub fn finish_sending(&mut self) -> Result<(), TransferError> {
        if !matches!(self.state, SessionState::Open | SessionState::Transferring) {
            return Err(TransferError::InvalidTransition {
                action: "finish sending",
                state: self.state,
            });
        }
        let Batch::Sender(items) = &self.batch else {
            return Err(TransferError::InvalidTransition {
                action: "finish sending",
                state: self.state,
            });
        };

        let released: Arc<[TransferItem]> = items.iter().map(TransferItem::released).collect();
        for (item_index, item) in released.iter().enumerate() {
            if item.size() == 0 {
                self.emit(SessionEvent::ItemCompleted {
                    item_index,
                    name: item.name().to_string(),
                });
            }
        }
        self.batch = Batch::Sender(released);
        self.transition(SessionState::Completed);
        Ok(())
    }

    fn note_progress(&mut self, progress: TransferProgress, moved: u64) {
        self.position = Position {
            item_index: Some(progress.item_index),
            offset: progress.transferred_bytes,
        };
        self.transferred += moved;
        self.speed.add_sample(moved);

        if self.state == SessionState::Open {
            self.transition(SessionState::Transferring);
        }
        self.emit(SessionEvent::Progress(progress));
    }

    // -- failure ------------------------------------------------------------

    /// Moves the session to `Failed` and returns the recorded failure.
    ///
    /// A finished session is left as is.
    pub fn fail(&mut self, err: &TransferError) -> Failure {
        if self.state.is_terminal() {
            return self
                .failure
                .clone()
                .unwrap_or_else(|| Failure::from(err));
        }

        let failure = Failure::from(err);
        warn!(
            session = self.id_for_log(),
            state = %self.state,
            kind = %failure.kind,
            context = %failure.context,
            "session failed: {}",
            failure.message
        );

        self.failure = Some(failure.clone());
        self.cancel.cancel();
        self.emit(SessionEvent::Failed(failure.clone()));
        self.transition(SessionState::Failed { kind: failure.kind });
        failure
    }

    /// Failure to report for a session that stopped without succeeding.
    pub(crate) fn failure_or(&self, kind: ErrorKind, message: &str) -> Failure {
        self.failure.clone().unwrap_or_else(|| Failure {
            kind,
            message: message.to_string(),
            context: format!("state {}", self.state),
        })
    }

    /// Position of the last chunk moved, for errors raised outside the
    /// session.
    pub(crate) fn last_position(&self) -> (Option<usize>, u64) {
        (self.position.item_index, self.position.offset)
    }

    // -- internals ----------------------------------------------------------

    fn expect(
        &self,
        side: Side,
        state: SessionState,
        action: &'static str,
    ) -> Result<(), TransferError> {
        if self.side != side || self.state != state {
            return Err(TransferError::InvalidTransition {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    fn claim(&mut self, id: &str) -> Result<(), TransferError> {
        if let Some(registry) = &self.registry {
            self.claim = Some(registry.claim(id)?);
        }
        Ok(())
    }

    fn transition(&mut self, to: SessionState) {
        let from = std::mem::replace(&mut self.state, to);
        info!(session = self.id_for_log(), %from, %to, "session state changed");

        if to.is_terminal() {
            self.claim = None;
        }
        self.emit(SessionEvent::StateChanged(to));
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events
            && tx.try_send(event).is_err()
        {
            debug!(session = self.id_for_log(), "session event dropped");
        }
    }

    fn id_for_log(&self) -> &str {
        self.id().unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<TransferItem> {
        vec![TransferItem::new("a.txt", "text/plain", b"hello".to_vec())]
    }

    fn frame(message: &WireMessage) -> TransportEvent {
        TransportEvent::Message(message.to_frame().unwrap())
    }

    /// Sender and receiver negotiated up to the point where both wait for
    /// the channel.
    fn negotiated() -> (Session, Session) {
        let mut sender = Session::sender(TransferConfig::default(), items());
        let mut receiver = Session::receiver(TransferConfig::default());

        let offer = sender.create_offer("sdp-offer").unwrap();
        receiver.apply_remote_descriptor(offer).unwrap();
        let answer = receiver.create_answer("sdp-answer").unwrap();
        sender.apply_remote_descriptor(answer).unwrap();
        (sender, receiver)
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn negotiation_states() {
        let (sender, receiver) = negotiated();
        assert_eq!(sender.state(), SessionState::Connecting);
        assert_eq!(receiver.state(), SessionState::AwaitingRemote);
        assert_eq!(sender.id(), receiver.id());
        assert_eq!(
            receiver.local_descriptor().unwrap().role(),
            Role::Answer
        );
        assert_eq!(sender.remote_descriptor().unwrap().descriptor(), "sdp-answer");
    }

    #[test]
    fn create_offer_only_once() {
        let mut sender = Session::sender(TransferConfig::default(), items());
        sender.create_offer("a").unwrap();
        let err = sender.create_offer("b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(sender.state(), SessionState::OfferCreated);
    }

    #[test]
    fn receiver_cannot_offer() {
        let mut receiver = Session::receiver(TransferConfig::default());
        assert!(receiver.create_offer("x").is_err());
        assert_eq!(receiver.state(), SessionState::Idle);
    }

    #[test]
    fn answer_requires_offer() {
        let mut receiver = Session::receiver(TransferConfig::default());
        let err = receiver.create_answer("x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(receiver.state(), SessionState::Idle);
    }

    #[test]
    fn second_remote_descriptor_rejected() {
        let mut receiver = Session::receiver(TransferConfig::default());
        let offer = SessionDescriptor::offer("one");
        receiver.apply_remote_descriptor(offer.clone()).unwrap();
        let err = receiver
            .apply_remote_descriptor(SessionDescriptor::offer("two"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(receiver.remote_descriptor(), Some(&offer));
    }

    #[test]
    fn wrong_role_rejected() {
        let mut sender = Session::sender(TransferConfig::default(), items());
        sender.create_offer("blob").unwrap();
        let err = sender
            .apply_remote_descriptor(SessionDescriptor::offer("other"))
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDescriptor(_)));
        assert_eq!(sender.state(), SessionState::OfferCreated);
    }

    #[test]
    fn mismatched_session_id_rejected() {
        let mut sender = Session::sender(TransferConfig::default(), items());
        sender.create_offer("blob").unwrap();
        let stranger = SessionDescriptor::offer("x");
        let answer = SessionDescriptor::answer_to(&stranger, "y");
        assert!(sender.apply_remote_descriptor(answer).is_err());
        assert_eq!(sender.state(), SessionState::OfferCreated);
    }

    #[test]
    fn full_exchange_over_events() {
        let (mut sender, mut receiver) = negotiated();
        let mut receiver_events = receiver.subscribe(64);

        sender.handle_transport_event(TransportEvent::Opened).unwrap();
        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        assert_eq!(sender.state(), SessionState::Open);
        assert_eq!(receiver.state(), SessionState::Open);

        let messages: Vec<_> = sender.begin_sending().unwrap().plan().collect();
        for message in &messages {
            receiver.handle_transport_event(frame(message)).unwrap();
        }
        assert_eq!(receiver.state(), SessionState::Completed);
        assert_eq!(receiver.transferred_bytes(), 5);

        let done = receiver.take_completed_items().unwrap();
        assert_eq!(done[0].bytes, b"hello");
        assert!(receiver.take_completed_items().is_none());

        let events = drain(&mut receiver_events);
        assert_eq!(
            events,
            vec![
                SessionEvent::StateChanged(SessionState::Open),
                SessionEvent::StateChanged(SessionState::Transferring),
                SessionEvent::Progress(TransferProgress {
                    item_index: 0,
                    transferred_bytes: 5,
                    total_bytes: 5,
                }),
                SessionEvent::ItemCompleted {
                    item_index: 0,
                    name: "a.txt".into(),
                },
                SessionEvent::StateChanged(SessionState::Completed),
            ]
        );
    }

    #[test]
    fn empty_batch_completes_from_open() {
        let (_, mut receiver) = negotiated();
        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        receiver
            .handle_transport_event(frame(&WireMessage::Metadata { items: vec![] }))
            .unwrap();
        assert_eq!(receiver.state(), SessionState::Open);
        receiver
            .handle_transport_event(frame(&WireMessage::Complete))
            .unwrap();
        assert_eq!(receiver.state(), SessionState::Completed);
    }

    #[test]
    fn oversized_announcement_keeps_eta_sane() {
        let (_, mut receiver) = negotiated();
        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        let huge = |name: &str| peerdrop_protocol::ItemMeta {
            name: name.into(),
            size: u64::MAX,
            mime_type: String::new(),
        };
        receiver
            .handle_transport_event(frame(&WireMessage::Metadata {
                items: vec![huge("a"), huge("b")],
            }))
            .unwrap();

        assert_eq!(receiver.total_bytes(), u64::MAX);
        assert_eq!(receiver.eta(), None);
        assert_eq!(receiver.state(), SessionState::Open);
    }

    #[test]
    fn malformed_frame_fails_with_decoding() {
        let (_, mut receiver) = negotiated();
        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        let failure = receiver
            .handle_transport_event(TransportEvent::Message(b"{nope".to_vec()))
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Decoding);
        assert_eq!(
            receiver.state(),
            SessionState::Failed {
                kind: ErrorKind::Decoding
            }
        );
        assert!(receiver.cancel_token().is_cancelled());
    }

    #[test]
    fn protocol_error_fails_session() {
        let (_, mut receiver) = negotiated();
        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        let failure = receiver
            .handle_transport_event(frame(&WireMessage::Complete))
            .unwrap_err();
        assert_eq!(
            failure.kind,
            ErrorKind::Protocol(ProtocolErrorKind::IncompleteTransfer)
        );
    }

    #[test]
    fn error_event_records_last_position() {
        let (mut sender, _) = negotiated();
        sender.handle_transport_event(TransportEvent::Opened).unwrap();
        sender
            .record_chunk_sent(TransferProgress {
                item_index: 0,
                transferred_bytes: 5,
                total_bytes: 5,
            })
            .unwrap();

        let failure = sender
            .handle_transport_event(TransportEvent::Error("reset".into()))
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::TransportFailed);
        assert_eq!(failure.context, "item 0, offset 5");
    }

    #[test]
    fn events_after_failure_ignored() {
        let (_, mut receiver) = negotiated();
        receiver
            .handle_transport_event(TransportEvent::Closed)
            .unwrap_err();
        let state = receiver.state();

        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        receiver
            .handle_transport_event(TransportEvent::Error("late".into()))
            .unwrap();
        assert_eq!(receiver.state(), state);
        assert_eq!(receiver.failure().unwrap().message, "transport failed: channel closed");
    }

    #[test]
    fn fail_is_idempotent() {
        let (mut sender, _) = negotiated();
        let first = sender.fail(&TransferError::NegotiationTimeout(Duration::from_secs(1)));
        let second = sender.fail(&TransferError::Cancelled {
            item_index: None,
            offset: 0,
        });
        assert_eq!(first, second);
        assert_eq!(
            sender.state(),
            SessionState::Failed {
                kind: ErrorKind::NegotiationTimeout
            }
        );
    }

    #[test]
    fn expire_only_while_negotiating() {
        let (mut sender, _) = negotiated();
        assert!(sender.expire_negotiation(Duration::from_secs(30)));
        assert_eq!(
            sender.failure().unwrap().kind,
            ErrorKind::NegotiationTimeout
        );

        let (_, mut receiver) = negotiated();
        receiver.handle_transport_event(TransportEvent::Opened).unwrap();
        assert!(!receiver.expire_negotiation(Duration::from_secs(30)));
        assert_eq!(receiver.state(), SessionState::Open);
    }

    #[test]
    fn finish_sending_releases_payloads() {
        let (mut sender, _) = negotiated();
        sender.handle_transport_event(TransportEvent::Opened).unwrap();
        sender
            .record_chunk_sent(TransferProgress {
                item_index: 0,
                transferred_bytes: 5,
                total_bytes: 5,
            })
            .unwrap();
        sender.finish_sending().unwrap();

        assert_eq!(sender.state(), SessionState::Completed);
        let items = sender.items().unwrap();
        assert!(!items[0].has_payload());
        assert_eq!(items[0].size(), 5);
        assert_eq!(sender.transferred_bytes(), 5);
    }

    #[test]
    fn nothing_leaves_completed() {
        let (mut sender, _) = negotiated();
        sender.handle_transport_event(TransportEvent::Opened).unwrap();
        sender.finish_sending().unwrap();

        sender.handle_transport_event(TransportEvent::Closed).unwrap();
        assert_eq!(sender.state(), SessionState::Completed);
        sender.fail(&TransferError::NegotiationTimeout(Duration::from_secs(1)));
        assert_eq!(sender.state(), SessionState::Completed);
        assert!(sender.failure().is_none());
    }

    #[test]
    fn registry_rejects_duplicate_live_session() {
        let registry = SessionRegistry::new();
        let offer = SessionDescriptor::offer("blob");

        let mut first =
            Session::receiver(TransferConfig::default()).with_registry(registry.clone());
        first.apply_remote_descriptor(offer.clone()).unwrap();
        assert!(registry.is_live(offer.session_id()));

        let mut second =
            Session::receiver(TransferConfig::default()).with_registry(registry.clone());
        let err = second.apply_remote_descriptor(offer.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateSession);
        assert!(second.remote_descriptor().is_none());

        drop(first);
        assert!(registry.is_empty());
        second.apply_remote_descriptor(offer).unwrap();
    }

    #[test]
    fn registry_claim_released_on_failure() {
        let registry = SessionRegistry::new();
        let mut sender =
            Session::sender(TransferConfig::default(), items()).with_registry(registry.clone());
        sender.create_offer("blob").unwrap();
        assert_eq!(registry.len(), 1);

        sender.expire_negotiation(Duration::from_secs(5));
        assert!(registry.is_empty());
    }

    #[test]
    fn full_event_channel_does_not_block() {
        let (mut sender, _) = negotiated();
        let _rx = sender.subscribe(1);
        sender.handle_transport_event(TransportEvent::Opened).unwrap();
        sender.finish_sending().unwrap();
        assert_eq!(sender.state(), SessionState::Completed);
    }
}
