use peerdrop_protocol::{Codec, CodecError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::{ReferenceStore, StoreError};

/// How a message was made shareable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedReference {
    /// The reference fits the codec's ceiling and can be shared directly.
    Inline(String),
    /// The reference was too long and sits in the store under `key`.
    Stored { key: String },
}

/// Encodes `message`, falling back to `store` when the reference is too
/// long to share inline.
pub fn publish<T: Serialize>(
    codec: &Codec,
    store: &dyn ReferenceStore,
    message: &T,
) -> Result<PublishedReference, StoreError> {
    match codec.encode(message) {
        Ok(reference) => Ok(PublishedReference::Inline(reference)),
        Err(CodecError::TooLong { length, max }) => {
            let reference = codec.encode_unbounded(message)?;
            let key = store.put(&reference)?;
            info!(%key, length, max, "reference too long to share, stored");
            Ok(PublishedReference::Stored { key })
        }
        Err(e) => Err(e.into()),
    }
}

/// Recovers the message behind a [`PublishedReference`].
pub fn resolve<T: DeserializeOwned>(
    codec: &Codec,
    store: &dyn ReferenceStore,
    published: &PublishedReference,
) -> Result<T, StoreError> {
    let reference = match published {
        PublishedReference::Inline(reference) => reference.clone(),
        PublishedReference::Stored { key } => store
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?,
    };
    Ok(codec.decode(&reference)?)
}
