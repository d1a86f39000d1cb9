//! Turning [`CacheSettings`] into a working transport.
//!
//! Everything here fails fast: a backend that was not compiled in, a
//! missing connection parameter or an empty secret is an error at startup,
//! never a silent downgrade to another backend or to plaintext.
use std::sync::Arc;

use hcache_config::{BackendKind, BackendSettings, CacheSettings, SecuritySettings};
use hcache_storage::{InMemoryStorage, SecretConfig, SecureStorage, SharedStorage};
use http::HeaderName;
use tracing::info;

use crate::CacheError;
use crate::freshness::FreshnessEngine;
use crate::transport::{CacheTransport, Fetcher, TransportOptions};

#[cfg(feature = "redis")]
const DEFAULT_REDIS_PREFIX: &str = "hcache";
#[cfg(feature = "mongodb")]
const DEFAULT_COLLECTION: &str = "http_cache";

/// Connect the backend named by `settings`.
pub async fn open_storage(
    settings: &BackendSettings,
) -> Result<SharedStorage, CacheError> {
    settings.validate()?;
    let storage: SharedStorage = match settings.kind {
        BackendKind::Memory => Arc::new(InMemoryStorage::new()),
        BackendKind::Fjall => open_fjall(settings)?,
        BackendKind::Redis => open_redis(settings).await?,
        BackendKind::Mongodb => open_mongodb(settings).await?,
    };
    info!(backend = ?settings.kind, "Cache storage ready");
    Ok(storage)
}

#[cfg(feature = "fjall")]
fn open_fjall(settings: &BackendSettings) -> Result<SharedStorage, CacheError> {
    let path = settings
        .path
        .as_ref()
        .ok_or_else(|| CacheError::Config("backend.path is required".to_string()))?;
    Ok(Arc::new(hcache_storage::FjallStorage::open(path)?))
}

#[cfg(not(feature = "fjall"))]
fn open_fjall(_settings: &BackendSettings) -> Result<SharedStorage, CacheError> {
    Err(not_compiled("fjall"))
}

#[cfg(feature = "redis")]
async fn open_redis(settings: &BackendSettings) -> Result<SharedStorage, CacheError> {
    let uri = settings
        .uri
        .as_deref()
        .ok_or_else(|| CacheError::Config("backend.uri is required".to_string()))?;
    let prefix = settings.prefix.as_deref().unwrap_or(DEFAULT_REDIS_PREFIX);
    let storage =
        hcache_storage::RedisStorage::connect(uri, prefix, settings.ttl()).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_settings: &BackendSettings) -> Result<SharedStorage, CacheError> {
    Err(not_compiled("redis"))
}

#[cfg(feature = "mongodb")]
async fn open_mongodb(
    settings: &BackendSettings,
) -> Result<SharedStorage, CacheError> {
    let uri = settings
        .uri
        .as_deref()
        .ok_or_else(|| CacheError::Config("backend.uri is required".to_string()))?;
    let collection = settings.collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
    let storage = hcache_storage::MongoStorage::connect(
        uri,
        settings.database.as_deref(),
        collection,
        settings.ttl(),
    )
    .await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "mongodb"))]
async fn open_mongodb(
    _settings: &BackendSettings,
) -> Result<SharedStorage, CacheError> {
    Err(not_compiled("mongodb"))
}

#[allow(dead_code)]
fn not_compiled(backend: &str) -> CacheError {
    CacheError::Config(format!(
        "{backend} backend requested but the `{backend}` feature is not enabled"
    ))
}

/// Wrap `inner` according to the `security` section. No section means no
/// wrapper; a section without a secret hashes keys only.
pub fn secure_storage(
    inner: SharedStorage,
    security: Option<&SecuritySettings>,
) -> Result<SharedStorage, CacheError> {
    let Some(security) = security else {
        return Ok(inner);
    };
    let Some(secret) = &security.secret else {
        return Ok(Arc::new(SecureStorage::hashing_only(inner)));
    };

    let mut config = SecretConfig::new(secret.as_str());
    if let Some(salt) = &security.salt {
        config = config.with_salt(salt.as_str());
    }
    if let Some(iterations) = security.iterations {
        config = config.with_iterations(iterations);
    }
    Ok(Arc::new(SecureStorage::encrypted(inner, &config)?))
}

pub fn transport_options(
    settings: &CacheSettings,
) -> Result<TransportOptions, CacheError> {
    let marker_header =
        HeaderName::from_bytes(settings.marker_header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| {
                CacheError::Config(format!(
                    "invalid marker_header {:?}: {e}",
                    settings.marker_header
                ))
            })?;

    Ok(TransportOptions {
        key_headers: settings.key_headers.clone(),
        mark_responses: settings.mark_responses,
        marker_header,
        storage_timeout: settings.storage_timeout(),
        freshness: FreshnessEngine::new().with_heuristic(settings.heuristic_freshness),
    })
}

/// Storage, security wrapper and options from one settings value.
pub async fn build_transport<F: Fetcher>(
    fetcher: F,
    settings: &CacheSettings,
) -> Result<CacheTransport<F>, CacheError> {
    settings.validate()?;
    let options = transport_options(settings)?;
    let storage = open_storage(&settings.backend).await?;
    let storage = secure_storage(storage, settings.security.as_ref())?;
    Ok(CacheTransport::new(fetcher, storage, options))
}
