use std::path::Path;

use async_trait::async_trait;
use fjall::{
    Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode,
};

use crate::{CacheStorage, StorageError};

/// Fjall-backed disk storage.
///
/// Layout:
/// - `cache`: key bytes -> record bytes
///
/// A record is written with a single insert, so readers never observe a
/// partially written value.
pub struct FjallStorage {
    db: Keyspace,
    records: PartitionHandle,
}

impl FjallStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let keyspace = Config::new(path).open()?;
        let records =
            keyspace.open_partition("cache", PartitionCreateOptions::default())?;

        Ok(Self {
            db: keyspace,
            records,
        })
    }
}

#[async_trait]
impl CacheStorage for FjallStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.records.get(key.as_bytes())?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.records.insert(key.as_bytes(), value)?;
        // Cache writes may be lost on crash; flushing the journal buffer
        // to the OS is enough.
        self.db.persist(PersistMode::Buffer)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.records.remove(key.as_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for FjallStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallStorage").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, FjallStorage) {
        let dir = tempdir().unwrap();
        let storage = FjallStorage::open(dir.path()).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn set_and_get() -> Result<(), StorageError> {
        let (_dir, storage) = make_storage();
        storage.set("https://example.com/", b"payload").await?;

        let value = storage.get("https://example.com/").await?;
        assert_eq!(value.as_deref(), Some(&b"payload"[..]));
        Ok(())
    }

    #[tokio::test]
    async fn missing_key() -> Result<(), StorageError> {
        let (_dir, storage) = make_storage();
        assert!(storage.get("nope").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_record() -> Result<(), StorageError> {
        let (_dir, storage) = make_storage();
        storage.set("k", b"v").await?;
        storage.delete("k").await?;
        storage.delete("k").await?;

        assert!(storage.get("k").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn survives_reopen() -> Result<(), StorageError> {
        let dir = tempdir().unwrap();
        {
            let storage = FjallStorage::open(dir.path())?;
            storage.set("k", b"persisted").await?;
            storage.db.persist(PersistMode::SyncAll)?;
        }

        let storage = FjallStorage::open(dir.path())?;
        assert_eq!(storage.get("k").await?.as_deref(), Some(&b"persisted"[..]));
        Ok(())
    }
}
