//! In-memory state store.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::{StateKey, StateStore, StorageError};

/// Volatile [`StateStore`] backed by a hash map.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<StateKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of written entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateStore for MemoryStore {
    fn exists(&self, key: StateKey) -> bool {
        self.entries.read().contains_key(&key)
    }

    fn read(&self, key: StateKey) -> Result<Vec<u8>, StorageError> {
        self.entries
            .read()
            .get(&key)
            .cloned()
            .ok_or(StorageError::Missing(key))
    }

    fn write(&self, key: StateKey, bytes: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key, bytes.to_vec());
        Ok(())
    }
}
