//! URL-safe text encoding for negotiation references.
//!
//! A reference is the canonical JSON form of a message, base64-encoded with
//! the URL-safe alphabet and no padding, so it can be pasted into a query
//! string without escaping.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::constants::DEFAULT_MAX_REFERENCE_LEN;

/// URL-safe alphabet, unpadded on encode, padding accepted on decode.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors produced while encoding or decoding references and frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("reference too long: {length} characters (max {max})")]
    TooLong { length: usize, max: usize },

    #[error("decoding failed: {0}")]
    Decoding(String),
}

impl CodecError {
    /// Returns `true` for errors raised while encoding.
    ///
    /// These are recoverable: the caller can publish the reference through
    /// another channel and try again.
    pub fn is_encoding(&self) -> bool {
        matches!(self, CodecError::Encoding(_) | CodecError::TooLong { .. })
    }
}

/// Reversible mapping between messages and URL-safe strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    max_len: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REFERENCE_LEN)
    }
}

impl Codec {
    /// Creates a codec rejecting references longer than `max_len` characters.
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Maximum accepted reference length.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Encodes `message`, failing with [`CodecError::TooLong`] when the
    /// result would not fit in a URL.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<String, CodecError> {
        let encoded = self.encode_unbounded(message)?;
        if encoded.len() > self.max_len {
            debug!(
                length = encoded.len(),
                max = self.max_len,
                "negotiation reference exceeds length ceiling"
            );
            return Err(CodecError::TooLong {
                length: encoded.len(),
                max: self.max_len,
            });
        }
        Ok(encoded)
    }

    /// Encodes `message` without applying the length ceiling.
    pub fn encode_unbounded<T: Serialize>(&self, message: &T) -> Result<String, CodecError> {
        let json = serde_json::to_vec(message).map_err(|e| CodecError::Encoding(e.to_string()))?;
        Ok(URL_SAFE_LENIENT.encode(json))
    }

    /// Decodes a reference produced by [`encode`](Self::encode).
    ///
    /// Surrounding whitespace is ignored. Decoding does not apply the length
    /// ceiling, so references fetched from a fallback store decode too.
    pub fn decode<T: DeserializeOwned>(&self, reference: &str) -> Result<T, CodecError> {
        let bytes = URL_SAFE_LENIENT
            .decode(reference.trim())
            .map_err(|e| CodecError::Decoding(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Decoding(e.to_string()))
    }
}
