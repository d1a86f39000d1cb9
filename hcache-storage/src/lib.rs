//! Byte-level persistence for the HTTP cache.
//!
//! Everything in here speaks opaque `key -> bytes` records. None of the
//! backends know anything about HTTP, freshness or serialization formats;
//! that belongs to the `hcache` crate sitting on top.
//!
//! Backends:
//! - in-memory (always available)
//! - fjall, an embedded LSM key/value store on disk (`fjall` feature)
//! - Redis (`redis` feature)
//! - MongoDB (`mongodb` feature)
//!
//! [`SecureStorage`] decorates any of them with key hashing and optional
//! authenticated encryption.
pub mod backend;
pub mod secure;
pub mod storage;

#[cfg(feature = "fjall")]
pub use crate::backend::FjallStorage;
pub use crate::backend::InMemoryStorage;
#[cfg(feature = "mongodb")]
pub use crate::backend::MongoStorage;
#[cfg(feature = "redis")]
pub use crate::backend::RedisStorage;
pub use crate::secure::{SecretConfig, SecureStorage, hash_key};
pub use crate::storage::{CacheStorage, SharedStorage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Backend(String),
    #[error("Storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Invalid storage configuration: {0}")]
    Config(String),
    #[error("Encryption error: {0}")]
    Crypto(String),
    #[cfg(feature = "fjall")]
    #[error("Fjall error")]
    FjallError(#[from] fjall::Error),
    #[cfg(feature = "redis")]
    #[error("Redis error")]
    RedisError(#[from] rustis::Error),
    #[cfg(feature = "mongodb")]
    #[error("Mongodb Error")]
    MongodbError(#[from] mongodb::error::Error),
}
