//! Contract between the transfer core and the peer connection stack.
//!
//! The core never negotiates or moves bytes itself. A [`Negotiator`] turns
//! opaque descriptor blobs into a connected [`DataChannel`]; the channel's
//! events arrive one at a time on an [`EventReceiver`].

use std::future::Future;

use tokio::sync::mpsc;

/// Event delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is ready for application data.
    Opened,
    /// A frame from the remote peer.
    Message(Vec<u8>),
    /// The channel closed.
    Closed,
    /// The channel reported an error.
    Error(String),
}

/// Stream of transport events for one channel.
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("channel error: {0}")]
    Failed(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// A message-oriented peer data channel.
pub trait DataChannel: Send + Sync {
    /// Queues a frame for sending. Delivery failures surface as events.
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Bytes queued but not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Resolves once the buffered amount is at or below `threshold`, or the
    /// channel is closed.
    fn buffered_amount_low(&self, threshold: usize) -> impl Future<Output = ()> + Send;

    /// Closes the channel. Idempotent.
    fn close(&self);
}

/// Builds a channel from an offer/answer exchange.
///
/// The sending peer calls [`create_offer`](Self::create_offer) then
/// [`accept_answer`](Self::accept_answer); the receiving peer calls
/// [`accept_offer`](Self::accept_offer). Both finish with
/// [`connect`](Self::connect).
pub trait Negotiator: Send {
    type Channel: DataChannel;

    /// Produces the local offer blob.
    fn create_offer(&mut self) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Applies the remote offer and produces the local answer blob.
    fn accept_offer(
        &mut self,
        offer: &str,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Applies the remote answer.
    fn accept_answer(
        &mut self,
        answer: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hands over the channel and its event stream.
    fn connect(
        self,
    ) -> impl Future<Output = Result<(Self::Channel, EventReceiver), TransportError>> + Send;
}
