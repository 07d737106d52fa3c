//! On-device key-value store
//!
//! One file per key under a single directory, written atomically. Every
//! context (tab, window, process-local session) that shares a store gets the
//! same change notifications: a write publishes a [`StorageEvent`] tagged
//! with the writer's [`ContextId`] so other contexts can re-read. Delivery is
//! best effort and carries no ordering guarantee.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

use super::file_io::{read_text, remove_file, write_text_atomic};

const VALUE_EXTENSION: &str = "dat";
const EVENT_CAPACITY: usize = 64;

/// Identity of one browsing context sharing a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change made to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: ContextId,
    /// `false` when the key was removed
    pub present: bool,
}

/// File-backed key-value store with change notification
pub struct KeyValueStore {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    events: broadcast::Sender<StorageEvent>,
    write_lock: Mutex<()>,
}

impl KeyValueStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: Option<u64>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StorageError::Io(format!("Failed to create store directory {}: {}", dir.display(), e))
        })?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            dir,
            quota_bytes,
            events,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the values
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a value
    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        read_text(self.path_for(key)?)
    }

    /// Write a value, notifying other contexts
    pub fn set(&self, origin: ContextId, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(limit) = self.quota_bytes {
            let needed = self.usage_excluding(key)? + value.len() as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }

        write_text_atomic(&path, value)?;
        debug!(key, bytes = value.len(), "Stored value");
        self.publish(origin, key, true);
        Ok(())
    }

    /// Remove a value, notifying other contexts
    pub fn remove(&self, origin: ContextId, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if path.exists() {
            remove_file(&path)?;
            self.publish(origin, key, false);
        }
        Ok(())
    }

    /// Check whether a key holds a value
    pub fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.path_for(key)?.exists())
    }

    /// All keys currently stored
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(VALUE_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if self.path_for(stem).is_ok() {
                        keys.push(stem.to_string());
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Bytes used by all stored values
    pub fn usage_bytes(&self) -> StorageResult<u64> {
        self.usage_excluding("")
    }

    /// Subscribe to change notifications from every context
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn usage_excluding(&self, excluded: &str) -> StorageResult<u64> {
        let mut total = 0;
        for key in self.keys()? {
            if key != excluded {
                total += fs::metadata(self.path_for(&key)?)?.len();
            }
        }
        Ok(total)
    }

    fn publish(&self, origin: ContextId, key: &str, present: bool) {
        // No subscribers is fine
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            origin,
            present,
        });
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::Validation(format!("Invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.{}", key, VALUE_EXTENSION)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_store(quota: Option<u64>) -> (TempDir, KeyValueStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyValueStore::open(temp_dir.path().join("kv"), quota).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_get_missing() {
        let (_temp_dir, store) = create_store(None);
        assert_eq!(store.get("nothing").unwrap(), None);
    }

    #[test]
    fn test_set_get_remove() {
        let (_temp_dir, store) = create_store(None);
        let ctx = ContextId::new();

        store.set(ctx, "budget-data", "{}").unwrap();
        assert_eq!(store.get("budget-data").unwrap().as_deref(), Some("{}"));
        assert_eq!(store.keys().unwrap(), vec!["budget-data".to_string()]);

        store.remove(ctx, "budget-data").unwrap();
        assert!(!store.contains("budget-data").unwrap());
    }

    #[test]
    fn test_invalid_key_rejected() {
        let (_temp_dir, store) = create_store(None);
        assert!(store.get("../escape").unwrap_err().is_validation());
        assert!(store.set(ContextId::new(), "", "x").is_err());
    }

    #[test]
    fn test_quota_enforced() {
        let (_temp_dir, store) = create_store(Some(10));
        let ctx = ContextId::new();

        store.set(ctx, "a", "12345").unwrap();
        // Overwriting the same key only counts the new size
        store.set(ctx, "a", "1234567890").unwrap();

        let err = store.set(ctx, "b", "x").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 11, limit: 10 }));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_events_carry_origin() {
        let (_temp_dir, store) = create_store(None);
        let mut rx = store.subscribe();
        let ctx = ContextId::new();

        store.set(ctx, "k", "v").unwrap();
        store.remove(ctx, "k").unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.key, "k");
        assert_eq!(first.origin, ctx);
        assert!(first.present);
        assert!(!rx.try_recv().unwrap().present);
    }

    #[test]
    fn test_usage_bytes() {
        let (_temp_dir, store) = create_store(None);
        let ctx = ContextId::new();
        store.set(ctx, "a", "123").unwrap();
        store.set(ctx, "b", "4567").unwrap();
        assert_eq!(store.usage_bytes().unwrap(), 7);
    }
}
