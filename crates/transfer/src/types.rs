use peerdrop_protocol::ItemMeta;

use crate::chunked::checksum_bytes;
use crate::error::{ErrorKind, Failure};

/// One file queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    name: String,
    size: u64,
    mime_type: String,
    /// Released once the batch has been fully sent.
    payload: Option<Vec<u8>>,
}

impl TransferItem {
    /// Creates an item whose size is the payload length.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: payload.len() as u64,
            mime_type: mime_type.into(),
            payload: Some(payload),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Payload bytes, empty once released.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Metadata announced to the receiver.
    pub fn meta(&self) -> ItemMeta {
        ItemMeta {
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
        }
    }

    /// Copy of the item without its payload.
    pub(crate) fn released(&self) -> Self {
        Self {
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            payload: None,
        }
    }
}

/// A fully received item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedItem {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl CompletedItem {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Hex SHA-256 of the received bytes.
    pub fn sha256(&self) -> String {
        checksum_bytes(&self.bytes)
    }
}

/// Byte progress of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub item_index: usize,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Progress as a percentage (0-100). Empty items count as done.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Which end of the transfer a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sender,
    Receiver,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, no descriptors yet.
    Idle,
    /// Sender: offer created, waiting for the out-of-band answer.
    OfferCreated,
    /// Receiver: offer applied and answer created, waiting for the channel.
    AwaitingRemote,
    /// Sender: both descriptors applied, waiting for the channel.
    Connecting,
    /// Channel open, no application data yet.
    Open,
    /// Metadata exchanged and chunks flowing.
    Transferring,
    Completed,
    Failed { kind: ErrorKind },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed { .. })
    }

    /// Returns `true` while the channel has not opened yet.
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            SessionState::OfferCreated | SessionState::AwaitingRemote | SessionState::Connecting
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::OfferCreated => f.write_str("offer created"),
            SessionState::AwaitingRemote => f.write_str("awaiting remote"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Open => f.write_str("open"),
            SessionState::Transferring => f.write_str("transferring"),
            SessionState::Completed => f.write_str("completed"),
            SessionState::Failed { kind } => write!(f, "failed ({kind})"),
        }
    }
}

/// Notifications emitted by a session for the consuming layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Progress(TransferProgress),
    ItemCompleted { item_index: usize, name: String },
    Failed(Failure),
}
