//! Error types for the loopback data channel.

use peerdrop_transfer::TransportError;

/// Errors produced while pairing loopback endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataChannelError {
    #[error("malformed descriptor: {0}")]
    MalformedBlob(String),

    #[error("no pending offer for this descriptor")]
    UnknownOffer,

    #[error("answer does not match the offer")]
    AnswerMismatch,

    #[error("offer already answered")]
    AlreadyAnswered,

    #[error("negotiation not finished")]
    NotNegotiated,
}

impl From<DataChannelError> for TransportError {
    fn from(err: DataChannelError) -> Self {
        TransportError::Negotiation(err.to_string())
    }
}
