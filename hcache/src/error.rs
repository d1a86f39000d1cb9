use hcache_config::ConfigError;
use hcache_storage::StorageError;
use thiserror::Error;

/// Setup-time failures. Once a transport is built, storage problems are
/// absorbed and never surface as `CacheError`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Settings(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
