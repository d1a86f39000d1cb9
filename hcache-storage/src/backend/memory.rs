//! In-memory implementation of the `CacheStorage` trait. Records live in a
//! mutex-guarded hashmap and vanish with the process.
use crate::{CacheStorage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStorage {
    pub hashmap: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hashmap.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored keys, mostly useful in tests.
    pub fn keys(&self) -> Vec<String> {
        self.hashmap
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheStorage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let hashmap = self
            .hashmap
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(hashmap.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut hashmap = self
            .hashmap
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        hashmap.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut hashmap = self
            .hashmap
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        hashmap.remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("hashmap_size", &self.len())
            .finish()
    }
}
