//! Routing cache: advisory TTL cache from subdomain to resolved route.
//!
//! The cache is a pure optimization in front of the tenant directory. Every
//! store failure (or stall) degrades to a miss; request handling never fails
//! because the cache substrate is down. Per-key invalidation epochs let an
//! invalidation win over a concurrent write of stale data.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::directory::ConnectionParams;

/// Bound on any single store operation. A slow substrate is treated exactly
/// like a failing one: the operation is dropped and lookups miss.
const STORE_OP_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
#[error("routing store: {0}")]
pub struct CacheStoreError(pub String);

/// Cached routing decision. Carries the tenant id as well as the parameters
/// so a cache hit needs no directory access at all.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedRoute {
    pub tenant_id: Uuid,
    pub params: ConnectionParams,
}

/// Snapshot of a key's invalidation counter. Capture one before reading the
/// directory and hand it to [`RoutingCache::set_if_unchanged`]; if the key is
/// invalidated in between, the stale write is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEpoch(u64);

/// Cache substrate. Implementations may be remote (and fallible); the
/// in-process default never errors.
#[async_trait]
pub trait RoutingStore: Send + Sync {
    async fn get(&self, subdomain: &str) -> Result<Option<CachedRoute>, CacheStoreError>;
    async fn set(
        &self,
        subdomain: &str,
        route: CachedRoute,
        ttl: Duration,
    ) -> Result<(), CacheStoreError>;
    async fn remove(&self, subdomain: &str) -> Result<(), CacheStoreError>;
}

/// In-memory store with lazy TTL expiry on read. RwLock allows concurrent
/// readers; expired entries are evicted by the next reader that sees them.
#[derive(Default)]
pub struct MemoryRoutingStore {
    inner: RwLock<HashMap<String, (CachedRoute, Instant)>>,
}

impl MemoryRoutingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl RoutingStore for MemoryRoutingStore {
    async fn get(&self, subdomain: &str) -> Result<Option<CachedRoute>, CacheStoreError> {
        {
            let guard = self.inner.read().await;
            match guard.get(subdomain) {
                Some((route, expires_at)) if Instant::now() < *expires_at => {
                    return Ok(Some(route.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry was present but expired; evict under the write lock.
        let mut guard = self.inner.write().await;
        if let Some((_, expires_at)) = guard.get(subdomain) {
            if Instant::now() >= *expires_at {
                guard.remove(subdomain);
            }
        }
        Ok(None)
    }

    async fn set(
        &self,
        subdomain: &str,
        route: CachedRoute,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        let expires_at = Instant::now() + ttl;
        self.inner
            .write()
            .await
            .insert(subdomain.to_string(), (route, expires_at));
        Ok(())
    }

    async fn remove(&self, subdomain: &str) -> Result<(), CacheStoreError> {
        self.inner.write().await.remove(subdomain);
        Ok(())
    }
}

/// Fail-open wrapper around a [`RoutingStore`]: get/set/invalidate never raise
/// and never stall past [`STORE_OP_TIMEOUT`]; a failing substrate just means
/// every lookup is a miss. Clones share the store and the epoch counters.
#[derive(Clone)]
pub struct RoutingCache {
    store: Arc<dyn RoutingStore>,
    default_ttl: Duration,
    // Per-key invalidation counters. Bounded by the number of tenants.
    epochs: Arc<DashMap<String, u64>>,
}

impl RoutingCache {
    pub fn new(store: Arc<dyn RoutingStore>, default_ttl: Duration) -> Self {
        RoutingCache {
            store,
            default_ttl,
            epochs: Arc::new(DashMap::new()),
        }
    }

    /// In-memory cache with the given TTL.
    pub fn in_memory(default_ttl: Duration) -> Self {
        RoutingCache::new(Arc::new(MemoryRoutingStore::new()), default_ttl)
    }

    fn current_epoch(&self, subdomain: &str) -> u64 {
        self.epochs.get(subdomain).map_or(0, |e| *e)
    }

    /// Current invalidation epoch for a key.
    pub fn epoch(&self, subdomain: &str) -> CacheEpoch {
        CacheEpoch(self.current_epoch(subdomain))
    }

    pub async fn get(&self, subdomain: &str) -> Option<CachedRoute> {
        match tokio::time::timeout(STORE_OP_TIMEOUT, self.store.get(subdomain)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                tracing::warn!(subdomain, error = %e, "routing cache get failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!(subdomain, "routing cache get timed out, treating as miss");
                None
            }
        }
    }

    /// Unconditional write. Callers that read the directory first should
    /// prefer [`RoutingCache::set_if_unchanged`].
    pub async fn set(&self, subdomain: &str, route: CachedRoute) {
        self.write_store(subdomain, route, self.default_ttl).await;
    }

    /// Write the route only if the key has not been invalidated since `epoch`
    /// was captured. An invalidation landing between the check and the write
    /// is caught by a re-check afterwards, so the invalidation always wins.
    pub async fn set_if_unchanged(&self, subdomain: &str, route: CachedRoute, epoch: CacheEpoch) {
        if self.current_epoch(subdomain) != epoch.0 {
            tracing::debug!(subdomain, "routing cache write skipped, key was invalidated");
            return;
        }
        self.write_store(subdomain, route, self.default_ttl).await;
        if self.current_epoch(subdomain) != epoch.0 {
            self.remove_store(subdomain).await;
        }
    }

    /// Best-effort removal, used when a tenant's credentials or status change.
    /// Bumps the key's epoch first so concurrent stale writes are refused.
    pub async fn invalidate(&self, subdomain: &str) {
        self.epochs
            .entry(subdomain.to_string())
            .and_modify(|e| *e += 1)
            .or_insert(1);
        self.remove_store(subdomain).await;
    }

    async fn write_store(&self, subdomain: &str, route: CachedRoute, ttl: Duration) {
        match tokio::time::timeout(STORE_OP_TIMEOUT, self.store.set(subdomain, route, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(subdomain, error = %e, "routing cache set failed, entry dropped")
            }
            Err(_) => tracing::warn!(subdomain, "routing cache set timed out, entry dropped"),
        }
    }

    async fn remove_store(&self, subdomain: &str) {
        match tokio::time::timeout(STORE_OP_TIMEOUT, self.store.remove(subdomain)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(subdomain, error = %e, "routing cache invalidate failed")
            }
            Err(_) => tracing::warn!(subdomain, "routing cache invalidate timed out"),
        }
    }
}
