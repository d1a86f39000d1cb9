use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use rustis::client::Client;
use rustis::commands::{GenericCommands, StringCommands};
use std::time::Duration;

use crate::{CacheStorage, StorageError};

/// Redis-backed storage. Every record lives under `{prefix}:{key}`.
///
/// Redis strings are binary safe but the client speaks text to us, so the
/// value is base64 armoured on the way in and out.
pub struct RedisStorage {
    pub client: Client,
    pub prefix: String,
    /// Expire records after this long. Expired records read as missing.
    pub ttl: Option<Duration>,
}

impl RedisStorage {
    pub async fn new(
        client: Client,
        prefix: &str,
        ttl: Option<Duration>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            ttl,
        })
    }

    pub async fn connect(
        uri: &str,
        prefix: &str,
        ttl: Option<Duration>,
    ) -> Result<Self, StorageError> {
        let client = Client::connect(uri).await?;
        Self::new(client, prefix, ttl).await
    }

    pub fn record_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheStorage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value: Option<String> =
            self.client.get(self.record_key(key)).await?;

        match value {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| StorageError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let encoded = STANDARD.encode(value);
        match self.ttl {
            Some(ttl) => {
                self.client
                    .setex(self.record_key(key), ttl.as_secs().max(1), encoded)
                    .await?
            }
            None => self.client.set(self.record_key(key), encoded).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client.del(self.record_key(key)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}
