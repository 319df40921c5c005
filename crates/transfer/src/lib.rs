//! Session state machine and chunked transfer protocol.
//!
//! A [`Session`] walks through offer/answer negotiation and then either
//! streams a batch of [`TransferItem`]s ([`ChunkedSender`]) or rebuilds one
//! ([`Reassembler`]). The peer connection itself stays behind the
//! [`DataChannel`] and [`Negotiator`] traits.

mod chunked;
mod config;
mod driver;
mod error;
mod export;
pub mod negotiate;
mod progress;
mod reassembly;
mod session;
mod transport;
mod types;
mod validation;

pub use chunked::{ChunkPlan, ChunkedSender, SendReport, checksum_bytes, chunk_count};
pub use config::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK, TransferConfig,
};
pub use driver::{drive_receiver, drive_sender, wait_until_open};
pub use error::{ErrorKind, Failure, ProtocolErrorKind, TransferError};
pub use export::export_items;
pub use progress::SpeedCalculator;
pub use reassembly::{ReceiveOutcome, Reassembler};
pub use session::{Session, SessionClaim, SessionRegistry};
pub use transport::{DataChannel, EventReceiver, Negotiator, TransportError, TransportEvent};
pub use types::{
    CompletedItem, SessionEvent, SessionState, Side, TransferItem, TransferProgress,
};
pub use validation::{MAX_NAME_LEN, validate_item_name};

pub use peerdrop_protocol::DEFAULT_CHUNK_SIZE;
