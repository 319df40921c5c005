//! Error types for the transfer crate.

use std::time::Duration;

use peerdrop_protocol::CodecError;

use crate::transport::TransportError;
use crate::types::SessionState;

/// Protocol violations detected while reassembling a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolErrorKind {
    /// Chunk for an unknown item, out of bounds, or out of order.
    InvalidChunk,
    /// Completion marker received before every item was fully received.
    IncompleteTransfer,
    /// Metadata received twice, or after a chunk.
    DuplicateMetadata,
    /// Message received after the batch completed.
    UnexpectedMessage,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProtocolErrorKind::InvalidChunk => "invalid chunk",
            ProtocolErrorKind::IncompleteTransfer => "incomplete transfer",
            ProtocolErrorKind::DuplicateMetadata => "duplicate metadata",
            ProtocolErrorKind::UnexpectedMessage => "unexpected message",
        })
    }
}

/// Classification of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Encoding,
    Decoding,
    TransportFailed,
    Protocol(ProtocolErrorKind),
    NegotiationTimeout,
    InvalidTransition,
    DuplicateSession,
    Cancelled,
    InvalidName,
    Io,
}

impl ErrorKind {
    /// Returns `true` if an error of this kind ends the session.
    ///
    /// Encoding failures happen before the reference leaves the process and
    /// API misuse leaves the session untouched; everything else is fatal.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Encoding
                | ErrorKind::InvalidTransition
                | ErrorKind::DuplicateSession
                | ErrorKind::InvalidName
                | ErrorKind::Io
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Encoding => f.write_str("encoding error"),
            ErrorKind::Decoding => f.write_str("decoding error"),
            ErrorKind::TransportFailed => f.write_str("transport failed"),
            ErrorKind::Protocol(kind) => write!(f, "protocol error ({kind})"),
            ErrorKind::NegotiationTimeout => f.write_str("negotiation timeout"),
            ErrorKind::InvalidTransition => f.write_str("invalid transition"),
            ErrorKind::DuplicateSession => f.write_str("duplicate session"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::InvalidName => f.write_str("invalid name"),
            ErrorKind::Io => f.write_str("I/O error"),
        }
    }
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport failed: {reason}")]
    TransportFailed {
        /// Item of the last chunk sent successfully (`None` before any chunk).
        item_index: Option<usize>,
        /// End offset of the last chunk sent successfully.
        offset: u64,
        reason: String,
    },

    #[error("protocol error ({kind}): {message}")]
    Protocol {
        kind: ProtocolErrorKind,
        item_index: Option<usize>,
        message: String,
    },

    #[error("negotiation timed out after {0:?}")]
    NegotiationTimeout(Duration),

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("session already active: {0}")]
    DuplicateSession(String),

    #[error("cancelled")]
    Cancelled {
        item_index: Option<usize>,
        offset: u64,
    },

    #[error("invalid item name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub(crate) fn protocol(
        kind: ProtocolErrorKind,
        item_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        TransferError::Protocol {
            kind,
            item_index,
            message: message.into(),
        }
    }

    /// Wraps a transport error raised while nothing has been sent yet.
    pub(crate) fn transport(err: TransportError) -> Self {
        TransferError::TransportFailed {
            item_index: None,
            offset: 0,
            reason: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Codec(e) if e.is_encoding() => ErrorKind::Encoding,
            TransferError::Codec(_) => ErrorKind::Decoding,
            TransferError::TransportFailed { .. } => ErrorKind::TransportFailed,
            TransferError::Protocol { kind, .. } => ErrorKind::Protocol(*kind),
            TransferError::NegotiationTimeout(_) => ErrorKind::NegotiationTimeout,
            TransferError::InvalidTransition { .. } | TransferError::InvalidDescriptor(_) => {
                ErrorKind::InvalidTransition
            }
            TransferError::DuplicateSession(_) => ErrorKind::DuplicateSession,
            TransferError::Cancelled { .. } => ErrorKind::Cancelled,
            TransferError::InvalidName(_) => ErrorKind::InvalidName,
            TransferError::Io(_) => ErrorKind::Io,
        }
    }

    /// Where the error happened, for display next to the message.
    pub fn context(&self) -> String {
        match self {
            TransferError::TransportFailed {
                item_index: Some(index),
                offset,
                ..
            }
            | TransferError::Cancelled {
                item_index: Some(index),
                offset,
            } => format!("item {index}, offset {offset}"),
            TransferError::TransportFailed { .. } | TransferError::Cancelled { .. } => {
                "before first chunk".into()
            }
            TransferError::Protocol {
                item_index: Some(index),
                ..
            } => format!("item {index}"),
            TransferError::InvalidTransition { state, .. } => format!("state {state}"),
            _ => String::new(),
        }
    }
}

/// A failure as surfaced to the user: what went wrong, why, and where.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub context: String,
}

impl From<&TransferError> for Failure {
    fn from(err: &TransferError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            context: err.context(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_split_by_direction() {
        let too_long = TransferError::from(CodecError::TooLong {
            length: 5000,
            max: 2000,
        });
        assert_eq!(too_long.kind(), ErrorKind::Encoding);
        assert!(!too_long.kind().is_terminal());

        let malformed = TransferError::from(CodecError::Decoding("bad".into()));
        assert_eq!(malformed.kind(), ErrorKind::Decoding);
        assert!(malformed.kind().is_terminal());
    }

    #[test]
    fn transport_failure_context_names_position() {
        let err = TransferError::TransportFailed {
            item_index: Some(0),
            offset: 16384,
            reason: "channel error: reset".into(),
        };
        let failure = Failure::from(&err);
        assert_eq!(failure.kind, ErrorKind::TransportFailed);
        assert_eq!(failure.context, "item 0, offset 16384");
        assert_eq!(failure.message, "transport failed: channel error: reset");
    }

    #[test]
    fn protocol_kind_display() {
        let err = TransferError::protocol(ProtocolErrorKind::InvalidChunk, Some(2), "out of range");
        assert_eq!(err.to_string(), "protocol error (invalid chunk): out of range");
        assert_eq!(
            err.kind(),
            ErrorKind::Protocol(ProtocolErrorKind::InvalidChunk)
        );
        assert_eq!(err.context(), "item 2");
    }

    #[test]
    fn terminal_kinds() {
        assert!(ErrorKind::NegotiationTimeout.is_terminal());
        assert!(ErrorKind::Protocol(ProtocolErrorKind::IncompleteTransfer).is_terminal());
        assert!(!ErrorKind::InvalidTransition.is_terminal());
    }
}
