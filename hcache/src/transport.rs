//! The caching interceptor.
//!
//! [`CacheTransport::intercept`] sits in front of a [`Fetcher`] and decides
//! per request whether to answer from storage, revalidate, or fetch in full.
//! Storage failures never reach the caller: reads degrade to misses and
//! writes are logged and skipped. Fetch errors are returned unchanged.
//!
//! Concurrent misses on the same key are not collapsed. Each caller fetches
//! and stores independently and the last write wins.
use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use hcache_storage::{SharedStorage, StorageError};
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode,
    header::{AGE, RANGE},
};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::freshness::{CacheControl, CacheState, FreshnessEngine};
use crate::key::{CacheKey, KeyDeriver};

pub const DEFAULT_MARKER_HEADER: &str = "x-cache-status";

/// Whatever actually performs the HTTP exchange.
#[async_trait]
pub trait Fetcher: Send + Sync {
    type Error: Send;

    async fn fetch(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Self::Error>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    type Error = F::Error;

    async fn fetch(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Self::Error> {
        (**self).fetch(request).await
    }
}

/// Where a response came from. Always present in the response extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProvenance {
    NotFromCache,
    FromCacheFresh,
    FromCacheRevalidated,
}

impl CacheProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFromCache => "not-from-cache",
            Self::FromCacheFresh => "from-cache-fresh",
            Self::FromCacheRevalidated => "from-cache-revalidated",
        }
    }
}

impl fmt::Display for CacheProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request extension: skip the lookup and go to the network. The fresh
/// response still replaces the stored one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceRefresh;

#[derive(Builder, Clone, Debug)]
#[builder(public, setter(into))]
pub struct TransportOptions {
    /// Request headers whose values partition the cache key.
    #[builder(default = "Vec::new()")]
    pub key_headers: Vec<String>,
    #[builder(default = "true")]
    pub mark_responses: bool,
    #[builder(
        default = "HeaderName::from_static(crate::transport::DEFAULT_MARKER_HEADER)"
    )]
    pub marker_header: HeaderName,
    #[builder(default = "std::time::Duration::from_secs(2)")]
    pub storage_timeout: Duration,
    #[builder(default = "FreshnessEngine::default()")]
    pub freshness: FreshnessEngine,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            key_headers: Vec::new(),
            mark_responses: true,
            marker_header: HeaderName::from_static(DEFAULT_MARKER_HEADER),
            storage_timeout: Duration::from_secs(2),
            freshness: FreshnessEngine::default(),
        }
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct CacheTransport<F> {
    fetcher: F,
    storage: SharedStorage,
    keys: KeyDeriver,
    engine: FreshnessEngine,
    options: TransportOptions,
    clock: Clock,
}

impl<F: Fetcher> CacheTransport<F> {
    pub fn new(fetcher: F, storage: SharedStorage, options: TransportOptions) -> Self {
        Self {
            fetcher,
            storage,
            keys: KeyDeriver::new(&options.key_headers),
            engine: options.freshness,
            options,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used for storage times and age.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub async fn intercept(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, F::Error> {
        let method = request.method().clone();

        if method != Method::GET {
            return self.forward(request).await;
        }
        if request.headers().contains_key(RANGE) {
            debug!(uri = %request.uri(), "Range request bypasses cache");
            let response = self.fetcher.fetch(request).await?;
            return Ok(self.annotate(response, CacheProvenance::NotFromCache, None));
        }

        let Some(key) = self.keys.derive(&method, request.uri(), request.headers())
        else {
            let response = self.fetcher.fetch(request).await?;
            return Ok(self.annotate(response, CacheProvenance::NotFromCache, None));
        };
        let request_headers = request.headers().clone();

        if request.extensions().get::<ForceRefresh>().is_some() {
            debug!(key = %key.digest(), "Forced refresh");
            let response = self.fetcher.fetch(request).await?;
            self.store(&key, &method, &request_headers, &response, true)
                .await;
            return Ok(self.annotate(response, CacheProvenance::NotFromCache, None));
        }

        let entry = self.load(&key).await;
        let now = (self.clock)();
        let state = self.engine.evaluate(entry.as_ref(), &request_headers, now);
        debug!(key = %key.digest(), ?state, "Cache lookup");

        match (state, entry) {
            (CacheState::Fresh, Some(entry)) => {
                let age = self.engine.current_age(&entry, now);
                Ok(self.annotate(
                    entry.to_response(),
                    CacheProvenance::FromCacheFresh,
                    Some(age),
                ))
            }
            _ if CacheControl::from_request(&request_headers).has("only-if-cached") => {
                debug!(key = %key.digest(), "only-if-cached without usable entry");
                Ok(self.annotate(
                    gateway_timeout(),
                    CacheProvenance::NotFromCache,
                    None,
                ))
            }
            (CacheState::StaleRevalidatable, Some(entry)) => {
                self.revalidate(key, request, request_headers, entry).await
            }
            (_, entry) => {
                let response = self.fetcher.fetch(request).await?;
                self.store(&key, &method, &request_headers, &response, entry.is_some())
                    .await;
                Ok(self.annotate(response, CacheProvenance::NotFromCache, None))
            }
        }
    }

    async fn revalidate(
        &self,
        key: CacheKey,
        mut request: Request<Bytes>,
        request_headers: HeaderMap,
        entry: CacheEntry,
    ) -> Result<Response<Bytes>, F::Error> {
        for (name, value) in self.engine.conditional_headers(&entry).iter() {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        let method = request.method().clone();
        let response = self.fetcher.fetch(request).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            let now = (self.clock)();
            let merged = self.engine.merge_not_modified(&entry, response.headers(), now);
            let no_store = CacheControl::from_headers(response.headers()).has("no-store")
                || CacheControl::from_request(&request_headers).has("no-store");
            if no_store {
                debug!(key = %key.digest(), "Revalidated, dropped for no-store");
                self.remove(&key).await;
            } else {
                debug!(key = %key.digest(), "Revalidated");
                self.write(&key, &merged).await;
            }
            let age = self.engine.current_age(&merged, now);
            return Ok(self.annotate(
                merged.to_response(),
                CacheProvenance::FromCacheRevalidated,
                Some(age),
            ));
        }

        debug!(key = %key.digest(), status = %response.status(), "Replaced on revalidation");
        self.store(&key, &method, &request_headers, &response, true)
            .await;
        Ok(self.annotate(response, CacheProvenance::NotFromCache, None))
    }

    /// Non-GET requests. Unsafe methods drop the entry a GET to the same
    /// resource would use once the origin accepts them.
    async fn forward(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, F::Error> {
        let invalidated = is_unsafe(request.method()).then(|| {
            self.keys
                .derive_for_invalidation(request.uri(), request.headers())
        });

        let response = self.fetcher.fetch(request).await?;

        if let Some(key) = invalidated {
            if response.status().as_u16() < 400 {
                debug!(key = %key.digest(), "Invalidated by unsafe method");
                self.remove(&key).await;
            }
        }
        Ok(self.annotate(response, CacheProvenance::NotFromCache, None))
    }

    /// Persist a freshly fetched response, or drop what it replaces when it
    /// may not be stored.
    async fn store(
        &self,
        key: &CacheKey,
        method: &Method,
        request_headers: &HeaderMap,
        response: &Response<Bytes>,
        replaces: bool,
    ) {
        let storable = self.engine.is_storable(
            method,
            request_headers,
            response.status(),
            response.headers(),
        );
        if storable {
            let entry = CacheEntry::from_response(response, (self.clock)())
                .with_vary(request_headers);
            self.write(key, &entry).await;
        } else if replaces {
            self.remove(key).await;
        }
    }

    async fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        let lookup = timeout(self.options.storage_timeout, self.storage.get(key.as_str()));
        let data = match lookup.await {
            Ok(Ok(data)) => data?,
            Ok(Err(err)) => {
                warn!(key = %key.digest(), error = %err, "Cache lookup failed");
                return None;
            }
            Err(_) => {
                warn!(key = %key.digest(), error = %self.timed_out(), "Cache lookup failed");
                return None;
            }
        };
        match CacheEntry::decode(&data) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key = %key.digest(), error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn write(&self, key: &CacheKey, entry: &CacheEntry) {
        let data = match entry.encode() {
            Ok(data) => data,
            Err(err) => {
                warn!(key = %key.digest(), error = %err, "Failed to encode cache entry");
                return;
            }
        };
        match timeout(
            self.options.storage_timeout,
            self.storage.set(key.as_str(), &data),
        )
        .await
        {
            Ok(Ok(())) => debug!(key = %key.digest(), "Stored"),
            Ok(Err(err)) => {
                warn!(key = %key.digest(), error = %err, "Cache write failed")
            }
            Err(_) => {
                warn!(key = %key.digest(), error = %self.timed_out(), "Cache write failed")
            }
        }
    }

    async fn remove(&self, key: &CacheKey) {
        match timeout(self.options.storage_timeout, self.storage.delete(key.as_str()))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(key = %key.digest(), error = %err, "Cache delete failed")
            }
            Err(_) => {
                warn!(key = %key.digest(), error = %self.timed_out(), "Cache delete failed")
            }
        }
    }

    fn timed_out(&self) -> StorageError {
        StorageError::Timeout(self.options.storage_timeout)
    }

    fn annotate(
        &self,
        mut response: Response<Bytes>,
        provenance: CacheProvenance,
        age: Option<Duration>,
    ) -> Response<Bytes> {
        if let Some(age) = age {
            response
                .headers_mut()
                .insert(AGE, HeaderValue::from(age.as_secs()));
        }
        if self.options.mark_responses {
            response.headers_mut().insert(
                self.options.marker_header.clone(),
                HeaderValue::from_static(provenance.as_str()),
            );
        }
        response.extensions_mut().insert(provenance);
        response
    }
}

impl<F> fmt::Debug for CacheTransport<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTransport")
            .field("keys", &self.keys)
            .field("engine", &self.engine)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn is_unsafe(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn gateway_timeout() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    response
}
