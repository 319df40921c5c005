use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::types::ItemMeta;

// ---------------------------------------------------------------------------
// Data channel frames
// ---------------------------------------------------------------------------

/// A message sent over the open data channel.
///
/// Frames are JSON text, internally tagged by `type`. The chunk payload is
/// base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Announces every item of the batch, in send order.
    #[serde(rename = "metadata")]
    Metadata { items: Vec<ItemMeta> },

    /// A slice of one item's payload.
    #[serde(rename = "chunk")]
    Chunk {
        #[serde(rename = "itemIndex")]
        item_index: u32,
        offset: u64,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },

    /// Sent once, after the last chunk of the last item.
    #[serde(rename = "complete")]
    Complete,
}

impl WireMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Metadata { .. } => "metadata",
            WireMessage::Chunk { .. } => "chunk",
            WireMessage::Complete => "complete",
        }
    }

    /// Serializes the message into a data channel frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encoding(e.to_string()))
    }

    /// Parses a data channel frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(frame).map_err(|e| CodecError::Decoding(e.to_string()))
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
