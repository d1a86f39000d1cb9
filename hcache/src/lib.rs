//! A caching layer for HTTP clients.
//!
//! [`CacheTransport`] wraps anything that can perform a request (a
//! [`Fetcher`], e.g. `reqwest::Client` with the `http` feature) and answers
//! from storage whenever standard HTTP freshness rules allow it:
//!
//! - fresh entries are served without touching the network;
//! - stale entries with a validator are revalidated with a conditional
//!   request, and a `304 Not Modified` refreshes the stored entry;
//! - everything else is fetched and, if storable, written back.
//!
//! Every response carries a [`CacheProvenance`] extension and, unless
//! disabled, an `x-cache-status` header.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use hcache::{CacheSettings, build_transport};
//!
//! let transport = build_transport(reqwest::Client::new(), &CacheSettings::default()).await?;
//! let request = http::Request::get("https://example.com/").body(bytes::Bytes::new())?;
//! let response = transport.intercept(request).await?;
//! println!("{:?}", response.headers().get("x-cache-status"));
//! # Ok(())
//! # }
//! ```
#[cfg(feature = "http")]
pub mod client;
pub mod entry;
pub mod error;
pub mod freshness;
pub mod key;
pub mod setup;
pub mod transport;

pub use crate::entry::CacheEntry;
pub use crate::error::CacheError;
pub use crate::freshness::{CacheControl, CacheState, FreshnessEngine};
pub use crate::key::{CacheKey, KeyDeriver};
pub use crate::setup::{
    build_transport, open_storage, secure_storage, transport_options,
};
pub use crate::transport::{
    CacheProvenance, CacheTransport, Clock, Fetcher, ForceRefresh,
    TransportOptions, TransportOptionsBuilder,
};
pub use hcache_config::{BackendKind, BackendSettings, CacheSettings, Configurable};
pub use hcache_storage::{
    CacheStorage, InMemoryStorage, SecretConfig, SecureStorage, SharedStorage,
    StorageError,
};
#[cfg(feature = "fjall")]
pub use hcache_storage::FjallStorage;
#[cfg(feature = "mongodb")]
pub use hcache_storage::MongoStorage;
#[cfg(feature = "redis")]
pub use hcache_storage::RedisStorage;

pub use bytes;
pub use hcache_config as config;
pub use hcache_storage as storage;
pub use http;
#[cfg(feature = "http")]
pub use reqwest;
// re-export
pub use async_trait;
pub use tracing;
