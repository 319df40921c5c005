use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::{ReferenceStore, StoreError, StoredReference, reference_key};

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    entries: Mutex<HashMap<String, StoredReference>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredReference>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ReferenceStore for MemoryReferenceStore {
    fn put_at(&self, reference: &str, stored_at: DateTime<Utc>) -> Result<String, StoreError> {
        let key = reference_key(reference);
        self.lock().insert(
            key.clone(),
            StoredReference {
                reference: reference.to_string(),
                stored_at,
            },
        );
        Ok(key)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).map(|e| e.reference.clone()))
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(key).is_some())
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at >= cutoff);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::DEFAULT_MAX_AGE;

    #[test]
    fn put_get_remove() {
        let store = MemoryReferenceStore::new();
        let key = store.put("reference-one").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("reference-one"));
        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn same_reference_same_key() {
        let store = MemoryReferenceStore::new();
        let a = store.put("x").unwrap();
        let b = store.put("x").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn purge_drops_old_entries() {
        let store = MemoryReferenceStore::new();
        let old = store
            .put_at("old", Utc::now() - TimeDelta::hours(25))
            .unwrap();
        let fresh = store.put("fresh").unwrap();

        assert_eq!(store.purge_expired(DEFAULT_MAX_AGE).unwrap(), 1);
        assert!(store.get(&old).unwrap().is_none());
        assert!(store.get(&fresh).unwrap().is_some());
    }
}
