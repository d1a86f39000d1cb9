//! The storage contract every backend implements.
//!
//! A backend persists whole records: after `set` returns, readers observe
//! either the previous value or the new one, never a mix.

use async_trait::async_trait;
use std::sync::Arc;

use super::StorageError;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// `Ok(None)` when nothing is stored under `key`, whatever the reason
    /// (never written, deleted, expired by the backend).
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

pub type SharedStorage = Arc<dyn CacheStorage>;

#[async_trait]
impl<T> CacheStorage for Arc<T>
where
    T: CacheStorage + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key).await
    }
}
