//! Directory-backed store: one `<key>.json` file per entry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    DEFAULT_MAX_AGE, ReferenceStore, StoreError, StoredReference, cutoff_for, reference_key,
};

const ENTRY_EXT: &str = "json";

/// Store persisting entries as JSON files in a directory.
#[derive(Debug, Clone)]
pub struct FileReferenceStore {
    dir: PathBuf,
}

impl FileReferenceStore {
    /// Opens (creating if needed) a store in `dir` and purges entries older
    /// than [`DEFAULT_MAX_AGE`].
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_max_age(dir, DEFAULT_MAX_AGE)
    }

    pub fn open_with_max_age(
        dir: impl Into<PathBuf>,
        max_age: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self { dir: dir.into() };
        std::fs::create_dir_all(&store.dir)?;

        let purged = store.purge_before(cutoff_for(max_age))?;
        if purged > 0 {
            info!(dir = %store.dir.display(), purged, "purged stale references");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        // Keys are hex digests; anything else cannot name an entry.
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(self.dir.join(format!("{key}.{ENTRY_EXT}")))
    }

    fn read_entry(path: &Path) -> Result<StoredReference, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ReferenceStore for FileReferenceStore {
    fn put_at(&self, reference: &str, stored_at: DateTime<Utc>) -> Result<String, StoreError> {
        let key = reference_key(reference);
        let path = self.dir.join(format!("{key}.{ENTRY_EXT}"));
        let entry = StoredReference {
            reference: reference.to_string(),
            stored_at,
        };
        std::fs::write(&path, serde_json::to_vec(&entry)?)?;
        debug!(%key, len = reference.len(), "reference stored");
        Ok(key)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(path) = self.entry_path(key) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        match Self::read_entry(&path) {
            Ok(entry) => Ok(Some(entry.reference)),
            Err(StoreError::Json(e)) => {
                warn!(%key, error = %e, "removing corrupt reference entry");
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let Some(path) = self.entry_path(key) else {
            return Ok(false);
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXT) {
                continue;
            }

            let stale = match Self::read_entry(&path) {
                Ok(stored) => stored.stored_at < cutoff,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "unreadable reference entry");
                    true
                }
            };
            if stale && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
