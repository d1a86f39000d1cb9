use async_trait::async_trait;
use chrono::Utc;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Binary, Document, doc, spec::BinarySubtype},
    options::IndexOptions,
};
use std::time::Duration;
use tracing::info;

use crate::{CacheStorage, StorageError};

/// MongoDB-backed storage, one document per record:
///
/// `{ key, value: Binary, updated_at, expires_at? }`
///
/// With a TTL configured, the server's TTL monitor removes expired
/// documents; until it gets to them, reads filter them out.
#[derive(Debug, Clone)]
pub struct MongoStorage {
    pub collection: Collection<Document>,
    pub ttl: Option<Duration>,
}

impl MongoStorage {
    pub async fn new(
        db: Database,
        collection_name: &str,
        ttl: Option<Duration>,
    ) -> Result<Self, StorageError> {
        let collection = db.collection(collection_name);
        let storage = Self { collection, ttl };
        storage.setup_indexes().await?;
        Ok(storage)
    }

    /// `database` falls back to the one named in the connection string.
    pub async fn connect(
        uri: &str,
        database: Option<&str>,
        collection_name: &str,
        ttl: Option<Duration>,
    ) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(uri).await?;
        let db = match database {
            Some(name) => client.database(name),
            None => client.default_database().ok_or_else(|| {
                StorageError::Config(
                    "mongodb uri names no database and none was given".to_string(),
                )
            })?,
        };
        Self::new(db, collection_name, ttl).await
    }

    /// Set up necessary indexes for the cache collection
    pub async fn setup_indexes(&self) -> Result<(), StorageError> {
        let mut indexes = vec![];

        let key_index = IndexModel::builder()
            .keys(doc! { "key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        indexes.push(key_index);

        if self.ttl.is_some() {
            let expiry_index = IndexModel::builder()
                .keys(doc! { "expires_at": 1 })
                .options(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .build(),
                )
                .build();
            indexes.push(expiry_index);
        }

        self.collection.create_indexes(indexes).await?;
        info!("HTTP cache indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for MongoStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(document) = self.collection.find_one(doc! { "key": key }).await?
        else {
            return Ok(None);
        };

        if let Ok(expires_at) = document.get_datetime("expires_at") {
            if expires_at.timestamp_millis() <= Utc::now().timestamp_millis() {
                return Ok(None);
            }
        }

        let value = document
            .get_binary_generic("value")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Some(value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = Utc::now();
        let mut fields = doc! {
            "key": key,
            "value": Binary {
                subtype: BinarySubtype::Generic,
                bytes: value.to_vec(),
            },
            "updated_at": now,
        };
        if let Some(ttl) = self.ttl {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| StorageError::Config(e.to_string()))?;
            fields.insert("expires_at", now + ttl);
        }

        // Single-document upsert: the record is replaced atomically.
        self.collection
            .update_one(doc! { "key": key }, doc! { "$set": fields })
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.collection.delete_one(doc! { "key": key }).await?;
        Ok(())
    }
}
