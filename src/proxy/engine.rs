//! Per-request cache decision: serve from cache, revalidate, or populate.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::cache::{CacheKey, CacheStore, StoreError, fingerprint};
use super::inspect;
use super::origin::{FetchError, Origin};
use super::request::ClientRequest;
use super::response;
use crate::metrics;

/// Terminal outcome of one client request, used for access logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The inbound message did not carry an acceptable URL.
    Rejected,
    /// No entry existed; the origin response was stored and relayed.
    Populated,
    /// No entry existed and the origin answered not-modified, relayed without storing.
    Relayed,
    /// The cached entry has no validator and was served without contacting the origin.
    ServedCached,
    /// The origin confirmed the cached entry is current.
    NotModified,
    /// The origin sent a new representation that replaced the cached one.
    Refreshed,
    /// Revalidation failed, so the cached entry was served as is.
    StaleOnError,
    /// The origin could not be reached and nothing was cached.
    GatewayError,
    /// The client did not finish sending its request in time.
    Timeout,
    /// The client closed before a complete request arrived; nothing was sent back.
    Abandoned,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Rejected => "REJECTED",
            Decision::Populated => "POPULATED",
            Decision::Relayed => "RELAYED",
            Decision::ServedCached => "SERVED_CACHED",
            Decision::NotModified => "NOT_MODIFIED",
            Decision::Refreshed => "REFRESHED",
            Decision::StaleOnError => "STALE_ON_ERROR",
            Decision::GatewayError => "GATEWAY_ERROR",
            Decision::Timeout => "TIMEOUT",
            Decision::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
}

impl CacheLookup {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheLookup::Hit => "hit",
            CacheLookup::Miss => "miss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Stored,
    Skipped,
    Error,
}

impl CacheWrite {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheWrite::Stored => "stored",
            CacheWrite::Skipped => "skipped",
            CacheWrite::Error => "error",
        }
    }
}

/// Everything the connection worker needs to answer the client and log the request.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub decision: Decision,
    pub response: Vec<u8>,
    pub cache_lookup: Option<CacheLookup>,
    pub cache_store: CacheWrite,
    pub error: Option<String>,
}

impl Outcome {
    fn new(decision: Decision, response: Vec<u8>, cache_lookup: CacheLookup) -> Self {
        Self {
            decision,
            response,
            cache_lookup: Some(cache_lookup),
            cache_store: CacheWrite::Skipped,
            error: None,
        }
    }

    /// Response for a message that never produced a URL.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Rejected,
            response: response::BAD_REQUEST.to_vec(),
            cache_lookup: None,
            cache_store: CacheWrite::Skipped,
            error: Some(reason.into()),
        }
    }

    /// Response for a client that stalled before its request was complete.
    pub fn timed_out(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Timeout,
            response: response::REQUEST_TIMEOUT.to_vec(),
            cache_lookup: None,
            cache_store: CacheWrite::Skipped,
            error: Some(reason.into()),
        }
    }

    fn with_store(mut self, store: CacheWrite) -> Self {
        self.cache_store = store;
        self
    }

    fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn status_code(&self) -> Option<u16> {
        inspect::status_code(&self.response)
    }
}

/// What the cache holds for a key at decision time.
#[derive(Debug)]
enum CacheState {
    NoCacheEntry,
    CacheNoToken { cached: Vec<u8> },
    CacheWithToken { cached: Vec<u8>, token: String },
}

/// Async locks keyed by [`CacheKey`], so one key's decide-and-write sequence runs at a time.
///
/// Entries hold weak references and disappear once no request uses the key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<CacheKey, Weak<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    locks.retain(|_, lock| lock.strong_count() > 0);
                    let lock = Arc::new(AsyncMutex::new(()));
                    locks.insert(key.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Engine {
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
    locks: KeyLocks,
}

impl Engine {
    pub fn new(store: Arc<dyn CacheStore>, origin: Arc<dyn Origin>) -> Self {
        Self {
            store,
            origin,
            locks: KeyLocks::new(),
        }
    }

    /// Decide how to answer `request` and carry out any origin fetch and cache write.
    pub async fn handle(&self, request: &ClientRequest) -> Outcome {
        let key = fingerprint(&request.url);
        let _guard = self.locks.acquire(&key).await;

        let state = self.lookup(&key, &request.url).await;
        metrics::record_cache_lookup(!matches!(state, CacheState::NoCacheEntry));
        match state {
            CacheState::NoCacheEntry => self.populate(request, &key).await,
            CacheState::CacheNoToken { cached } => {
                info!(url = %request.url, "serving from cache, entry has no validator");
                Outcome::new(Decision::ServedCached, cached, CacheLookup::Hit)
            }
            CacheState::CacheWithToken { cached, token } => {
                self.revalidate(request, &key, cached, token).await
            }
        }
    }

    async fn lookup(&self, key: &CacheKey, url: &str) -> CacheState {
        if !self.store.exists(key).await {
            return CacheState::NoCacheEntry;
        }
        let cached = match self.store.read(key).await {
            Ok(cached) => cached,
            Err(StoreError::NotFound(_)) => return CacheState::NoCacheEntry,
            Err(err) => {
                warn!(url, error = %err, "failed to read cache entry, fetching from origin");
                return CacheState::NoCacheEntry;
            }
        };
        match inspect::validation_token(&cached) {
            Some(token) => CacheState::CacheWithToken { cached, token },
            None => CacheState::CacheNoToken { cached },
        }
    }

    async fn populate(&self, request: &ClientRequest, key: &CacheKey) -> Outcome {
        debug!(url = %request.url, "no cache entry, fetching from origin");
        let raw = match self.origin.fetch(&request.uri, None).await {
            Ok(raw) => raw,
            Err(err) => {
                metrics::record_origin_fetch(false, err.kind());
                warn!(url = %request.url, error = %err, "origin fetch failed with nothing cached");
                return Outcome::new(
                    Decision::GatewayError,
                    response::BAD_GATEWAY.to_vec(),
                    CacheLookup::Miss,
                )
                .with_error(err);
            }
        };
        metrics::record_origin_fetch(false, "ok");

        if inspect::is_not_modified(&raw) {
            debug!(url = %request.url, "origin answered not-modified to an unconditional fetch");
            return Outcome::new(Decision::Relayed, raw, CacheLookup::Miss);
        }
        let (store, error) = self.store_entry(key, &raw, &request.url).await;
        let outcome = Outcome::new(Decision::Populated, raw, CacheLookup::Miss).with_store(store);
        match error {
            Some(err) => outcome.with_error(err),
            None => outcome,
        }
    }

    async fn revalidate(
        &self,
        request: &ClientRequest,
        key: &CacheKey,
        cached: Vec<u8>,
        token: String,
    ) -> Outcome {
        info!(url = %request.url, since = %token, "revalidating cache entry");
        let raw = match self.origin.fetch(&request.uri, Some(&token)).await {
            Ok(raw) => raw,
            Err(err) => return self.serve_stale(request, cached, err),
        };

        if inspect::is_not_modified(&raw) {
            metrics::record_origin_fetch(true, "not_modified");
            info!(url = %request.url, "cache entry still valid, serving from cache");
            return Outcome::new(Decision::NotModified, cached, CacheLookup::Hit);
        }
        metrics::record_origin_fetch(true, "modified");
        info!(url = %request.url, "cache outdated, replacing entry");
        let (store, error) = self.store_entry(key, &raw, &request.url).await;
        let outcome = Outcome::new(Decision::Refreshed, raw, CacheLookup::Hit).with_store(store);
        match error {
            Some(err) => outcome.with_error(err),
            None => outcome,
        }
    }

    fn serve_stale(&self, request: &ClientRequest, cached: Vec<u8>, err: FetchError) -> Outcome {
        metrics::record_origin_fetch(true, err.kind());
        warn!(url = %request.url, error = %err, "revalidation failed, serving stale entry");
        Outcome::new(Decision::StaleOnError, cached, CacheLookup::Hit).with_error(err)
    }

    async fn store_entry(
        &self,
        key: &CacheKey,
        raw: &[u8],
        url: &str,
    ) -> (CacheWrite, Option<StoreError>) {
        match self.store.write(key, raw).await {
            Ok(()) => {
                metrics::record_cache_store();
                (CacheWrite::Stored, None)
            }
            Err(err) => {
                metrics::record_cache_store_error();
                warn!(url, error = %err, "failed to write cache entry");
                (CacheWrite::Error, Some(err))
            }
        }
    }
}
