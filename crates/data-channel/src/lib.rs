//! In-process data channel for PeerDrop transfers.
//!
//! [`LoopbackChannel::pair`] gives two connected endpoints implementing
//! [`DataChannel`](peerdrop_transfer::DataChannel), with buffered-amount
//! accounting and hooks to close or fail the link mid-transfer.
//! [`LoopbackNegotiator`] pairs endpoints through offer/answer blobs so the
//! full negotiation path runs without a network.

pub mod error;
pub mod loopback;
pub mod negotiator;
pub mod token;

pub use error::DataChannelError;
pub use loopback::{LoopbackChannel, LoopbackOptions};
pub use negotiator::{LoopbackNegotiator, Rendezvous};
pub use token::{generate_token, validate_token};
