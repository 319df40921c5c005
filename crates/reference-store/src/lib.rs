//! Fallback storage for negotiation references.
//!
//! A reference that does not fit in a share link is kept in a
//! [`ReferenceStore`] under a short key, and the key travels instead.
//! Entries expire after [`DEFAULT_MAX_AGE`].

mod file;
mod memory;
mod publish;

pub use file::FileReferenceStore;
pub use memory::MemoryReferenceStore;
pub use publish::{PublishedReference, publish, resolve};

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Entries older than this are purged (24 hours).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors from reference store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] peerdrop_protocol::CodecError),

    #[error("no stored reference for key {0}")]
    NotFound(String),
}

/// One stored reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReference {
    pub reference: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
}

/// Key/value storage for references.
pub trait ReferenceStore: Send + Sync {
    /// Stores `reference` as of `stored_at` and returns its key.
    fn put_at(&self, reference: &str, stored_at: DateTime<Utc>) -> Result<String, StoreError>;

    /// Returns the reference stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes `key`. Returns whether it was present.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes entries stored before `cutoff`, plus unreadable ones.
    /// Returns how many were removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Stores `reference` now.
    fn put(&self, reference: &str) -> Result<String, StoreError> {
        self.put_at(reference, Utc::now())
    }

    /// Removes entries older than `max_age`.
    fn purge_expired(&self, max_age: Duration) -> Result<usize, StoreError> {
        self.purge_before(cutoff_for(max_age))
    }
}

/// Oldest `stored_at` still considered fresh for `max_age`.
pub(crate) fn cutoff_for(max_age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Key for a reference: first 16 bytes of its SHA-256 (32 hex characters).
///
/// Storing the same reference twice yields the same key.
pub fn reference_key(reference: &str) -> String {
    let hash = Sha256::digest(reference.as_bytes());
    hex::encode(&hash[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = reference_key("eyJyb2xlIjoib2ZmZXIifQ");
        assert_eq!(a, reference_key("eyJyb2xlIjoib2ZmZXIifQ"));
        assert_eq!(a.len(), 32);
        assert_ne!(a, reference_key("other"));
    }

    #[test]
    fn huge_max_age_does_not_overflow() {
        assert_eq!(cutoff_for(Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert!(cutoff_for(DEFAULT_MAX_AGE) < Utc::now());
    }

    #[test]
    fn stored_reference_json_shape() {
        let entry = StoredReference {
            reference: "abc".into(),
            stored_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"reference": "abc", "storedAt": 1_700_000_000_000i64})
        );
    }
}
