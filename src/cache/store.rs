//! Backing stores for the expiring cache.
//!
//! A store is a flat, textual key-value table with a finite capacity. Writes
//! that would exceed the capacity are rejected with
//! [`StoreError::QuotaExceeded`]; the cache decides how to recover.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Default capacity, in bytes of keys plus values.
pub const DEFAULT_CAPACITY_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("quota exceeded writing '{key}': {required} bytes required, {available} available")]
    QuotaExceeded {
        key: String,
        required: usize,
        available: usize,
    },
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is corrupt: {0}")]
    Corrupt(String),
}

/// A textual key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys currently stored.
    fn keys(&self) -> Vec<String>;

    /// Delete every key in `keys`. Returns how many existed.
    fn remove_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Vec<String> {
        (**self).keys()
    }

    fn remove_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        (**self).remove_many(keys)
    }
}

/// Key/value table with byte accounting shared by both store kinds.
#[derive(Debug, Default)]
struct Table {
    entries: BTreeMap<String, String>,
    used: usize,
}

impl Table {
    fn from_entries(entries: BTreeMap<String, String>) -> Self {
        let used = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
        Self { entries, used }
    }

    /// Insert if the quota allows it, returning the previous value.
    fn try_insert(
        &mut self,
        capacity: usize,
        key: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError> {
        let freed = self
            .entries
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or(0);
        let required = key.len() + value.len();
        let available = capacity.saturating_sub(self.used - freed);

        if required > available {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                required,
                available,
            });
        }

        self.used = self.used - freed + required;
        Ok(self.entries.insert(key.to_string(), value.to_string()))
    }

    /// Put `key` back to `previous`, whether or not it is currently present.
    fn restore(&mut self, key: &str, previous: Option<String>) {
        self.take(key);
        if let Some(old) = previous {
            self.used += key.len() + old.len();
            self.entries.insert(key.to_string(), old);
        }
    }

    fn take(&mut self, key: &str) -> Option<String> {
        let old = self.entries.remove(key)?;
        self.used -= key.len() + old.len();
        Some(old)
    }
}

/// An in-process store with a byte quota.
#[derive(Debug)]
pub struct MemoryStore {
    table: RwLock<Table>,
    capacity: usize,
}

impl MemoryStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    /// Create a store holding at most `capacity` bytes of keys plus values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            capacity,
        }
    }

    /// Bytes currently used.
    pub fn used_bytes(&self) -> usize {
        self.table.read().used
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.table.read().entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.table.write().try_insert(self.capacity, key, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.table.write().take(key).is_some())
    }

    fn keys(&self) -> Vec<String> {
        self.table.read().entries.keys().cloned().collect()
    }

    fn remove_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut table = self.table.write();
        Ok(keys.iter().filter(|key| table.take(key).is_some()).count())
    }
}

/// A store persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash never leaves a half-written store behind. A mutation that fails
/// to persist is rolled back in memory.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: RwLock<Table>,
    capacity: usize,
}

impl FileStore {
    /// Open the store at `path`, creating an empty one if the file is missing.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str::<BTreeMap<String, String>>(&contents)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?
            }
        } else {
            BTreeMap::new()
        };

        info!(
            path = %path.display(),
            keys = entries.len(),
            capacity,
            "Opened file store"
        );

        Ok(Self {
            path,
            table: RwLock::new(Table::from_entries(entries)),
            capacity,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently used.
    pub fn used_bytes(&self) -> usize {
        self.table.read().used
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn persist(&self, table: &Table) -> Result<(), StoreError> {
        let json = serde_json::to_string(&table.entries)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = json.len(), "Persisted file store");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.table.read().entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut table = self.table.write();
        let previous = table.try_insert(self.capacity, key, value)?;

        if let Err(e) = self.persist(&table) {
            table.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut table = self.table.write();
        let Some(previous) = table.take(key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&table) {
            table.restore(key, Some(previous));
            return Err(e);
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<String> {
        self.table.read().entries.keys().cloned().collect()
    }

    /// Removes the batch in memory and rewrites the file once.
    fn remove_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut table = self.table.write();
        let taken: Vec<(&String, String)> = keys
            .iter()
            .filter_map(|key| table.take(key).map(|old| (key, old)))
            .collect();
        if taken.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.persist(&table) {
            for (key, old) in taken {
                table.restore(key, Some(old));
            }
            return Err(e);
        }
        Ok(taken.len())
    }
}
