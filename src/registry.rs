//! Connection pool registry: one live pool per tenant id, created lazily and
//! reused across requests.
//!
//! Creation is single-flight per tenant id so a burst of first requests for a
//! newly active tenant opens exactly one pool; unrelated tenants initialize
//! concurrently. Everything after publication (fast-path lookup, metrics) is a
//! lock-free read.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::directory::ConnectionParams;
use crate::error::PoolError;

/// Builds and tears down the actual pool objects. The production connector
/// speaks PostgreSQL; tests substitute an in-memory one.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    type Pool: Clone + Send + Sync + 'static;

    /// Open a pool for one tenant database. The only registry step that
    /// performs network I/O; a failure here must leave nothing registered.
    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Pool, PoolError>;

    /// Drain and close a pool.
    async fn close(&self, pool: &Self::Pool) -> Result<(), PoolError>;

    /// Live connection count, when the pool type exposes one.
    fn active_connections(&self, _pool: &Self::Pool) -> Option<u32> {
        None
    }
}

/// sqlx-backed connector. Opens one eager connection so bad credentials or an
/// unreachable host fail at registration time, not on first query.
#[derive(Clone, Debug)]
pub struct PgConnector {
    pub acquire_timeout: Duration,
}

impl Default for PgConnector {
    fn default() -> Self {
        PgConnector {
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl PoolConnector for PgConnector {
    type Pool = PgPool;

    async fn connect(&self, params: &ConnectionParams) -> Result<PgPool, PoolError> {
        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.user)
            .password(&params.password);
        PgPoolOptions::new()
            .max_connections(params.pool_size.max(1))
            .min_connections(1)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| PoolError::Init(e.to_string()))
    }

    async fn close(&self, pool: &PgPool) -> Result<(), PoolError> {
        pool.close().await;
        Ok(())
    }

    fn active_connections(&self, pool: &PgPool) -> Option<u32> {
        Some(pool.size())
    }
}

/// One registered pool plus its bookkeeping. Requests hold an `Arc` to this
/// for their lifetime; the registry holds the canonical one.
#[derive(Debug)]
pub struct PoolHandle<P> {
    pool: P,
    pool_size: u32,
    created_at: Instant,
    acquires: AtomicU64,
    releases: AtomicU64,
    last_acquire_micros: AtomicU64,
    last_acquired_at: Mutex<Option<Instant>>,
}

impl<P> PoolHandle<P> {
    fn new(pool: P, pool_size: u32) -> Self {
        PoolHandle {
            pool,
            pool_size,
            created_at: Instant::now(),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            last_acquire_micros: AtomicU64::new(0),
            last_acquired_at: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    fn note_acquire(&self, latency: Duration) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        self.last_acquire_micros
            .store(latency.as_micros() as u64, Ordering::Relaxed);
        if let Ok(mut at) = self.last_acquired_at.lock() {
            *at = Some(Instant::now());
        }
    }

    /// Called when a request context is done with the pool.
    pub(crate) fn note_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, active_connections: Option<u32>) -> PoolMetrics {
        let acquires = self.acquires.load(Ordering::Relaxed);
        let last_micros = self.last_acquire_micros.load(Ordering::Relaxed);
        let last_acquired_at = self.last_acquired_at.lock().ok().and_then(|at| *at);
        PoolMetrics {
            pool_size: self.pool_size,
            active_connections,
            age: self.created_at.elapsed(),
            acquire_count: acquires,
            release_count: self.releases.load(Ordering::Relaxed),
            last_acquire_latency: (acquires > 0).then(|| Duration::from_micros(last_micros)),
            idle_for: last_acquired_at.map(|at| at.elapsed()),
        }
    }
}

/// Read-only metrics snapshot for one tenant's pool.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolMetrics {
    pub pool_size: u32,
    pub active_connections: Option<u32>,
    pub age: Duration,
    pub acquire_count: u64,
    pub release_count: u64,
    pub last_acquire_latency: Option<Duration>,
    pub idle_for: Option<Duration>,
}

/// Process-wide registry mapping tenant id to its live pool. Construct once at
/// process start, call [`PoolRegistry::shutdown`] exactly once at the end.
pub struct PoolRegistry<C: PoolConnector> {
    connector: C,
    pools: DashMap<Uuid, Arc<PoolHandle<C::Pool>>>,
    // Per-tenant creation locks; never removed, bounded by tenant count.
    creation_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
}

impl PoolRegistry<PgConnector> {
    /// Registry with the default PostgreSQL connector.
    pub fn new_pg() -> Self {
        PoolRegistry::new(PgConnector::default())
    }
}

impl<C: PoolConnector> PoolRegistry<C> {
    pub fn new(connector: C) -> Self {
        PoolRegistry {
            connector,
            pools: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    fn creation_lock(&self, tenant_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.creation_locks.entry(tenant_id).or_default().clone()
    }

    /// Return the tenant's pool, creating it on first use. At most one pool is
    /// ever live per tenant id: concurrent first-time callers serialize on the
    /// tenant's creation lock and all receive the same handle.
    pub async fn acquire(
        &self,
        tenant_id: Uuid,
        params: &ConnectionParams,
    ) -> Result<Arc<PoolHandle<C::Pool>>, PoolError> {
        let started = Instant::now();

        // Fast path: already-published pool, no lock.
        if let Some(existing) = self.pools.get(&tenant_id).map(|e| e.value().clone()) {
            existing.note_acquire(started.elapsed());
            return Ok(existing);
        }

        let lock = self.creation_lock(tenant_id);
        let _guard = lock.lock().await;
        // Someone else may have created it while we waited.
        if let Some(existing) = self.pools.get(&tenant_id).map(|e| e.value().clone()) {
            existing.note_acquire(started.elapsed());
            return Ok(existing);
        }

        let pool = self.connector.connect(params).await?;
        let handle = Arc::new(PoolHandle::new(pool, params.pool_size));
        handle.note_acquire(started.elapsed());
        self.pools.insert(tenant_id, handle.clone());
        tracing::info!(
            %tenant_id,
            pool_size = params.pool_size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tenant pool created"
        );
        Ok(handle)
    }

    /// Close and unregister the tenant's pool. Idempotent; unknown ids are a
    /// no-op. Returns whether a pool was actually closed. Serializes with
    /// creation so a replacement pool cannot open before the old one closes.
    pub async fn release(&self, tenant_id: Uuid) -> bool {
        let lock = self.creation_lock(tenant_id);
        let _guard = lock.lock().await;
        match self.pools.remove(&tenant_id) {
            Some((_, handle)) => {
                if let Err(e) = self.connector.close(handle.pool()).await {
                    tracing::warn!(%tenant_id, error = %e, "pool close failed during release");
                } else {
                    tracing::info!(%tenant_id, "tenant pool released");
                }
                true
            }
            None => false,
        }
    }

    /// Metrics snapshot for one tenant, if a pool is registered.
    pub fn metrics(&self, tenant_id: Uuid) -> Option<PoolMetrics> {
        self.pools.get(&tenant_id).map(|entry| {
            let handle = entry.value();
            handle.snapshot(self.connector.active_connections(handle.pool()))
        })
    }

    /// Snapshot of every registered pool, for metrics scrapers.
    pub fn all_metrics(&self) -> Vec<(Uuid, PoolMetrics)> {
        self.pools
            .iter()
            .map(|entry| {
                let handle = entry.value();
                (
                    *entry.key(),
                    handle.snapshot(self.connector.active_connections(handle.pool())),
                )
            })
            .collect()
    }

    /// Number of live pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Close every registered pool, best-effort on each, and clear the
    /// registry. Returns the per-tenant failures (empty on a clean shutdown).
    /// Call exactly once at graceful process termination.
    pub async fn shutdown(&self) -> Vec<(Uuid, PoolError)> {
        let ids: Vec<Uuid> = self.pools.iter().map(|entry| *entry.key()).collect();
        let closes = ids.into_iter().filter_map(|id| {
            self.pools.remove(&id).map(|(_, handle)| async move {
                (id, self.connector.close(handle.pool()).await)
            })
        });
        let mut failures = Vec::new();
        for (id, result) in futures::future::join_all(closes).await {
            if let Err(e) = result {
                tracing::warn!(tenant_id = %id, error = %e, "pool close failed during shutdown");
                failures.push((id, e));
            }
        }
        self.creation_locks.clear();
        tracing::info!(failed = failures.len(), "pool registry shut down");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: "db.internal".into(),
            port: 5432,
            database: "club_one".into(),
            user: "club".into(),
            password: "pw".into(),
            pool_size: 5,
        }
    }

    /// Connector over unit "pools"; counts connects and can fail the first N.
    #[derive(Default)]
    struct TestConnector {
        connects: Arc<AtomicUsize>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl PoolConnector for TestConnector {
        type Pool = Arc<usize>;

        async fn connect(&self, _params: &ConnectionParams) -> Result<Self::Pool, PoolError> {
            // Widen the race window for the single-flight test.
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PoolError::Init("connection refused".into()));
            }
            Ok(Arc::new(self.connects.fetch_add(1, Ordering::SeqCst)))
        }

        async fn close(&self, _pool: &Self::Pool) -> Result<(), PoolError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_initialize_exactly_one_pool() {
        let connects = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(PoolRegistry::new(TestConnector {
            connects: connects.clone(),
            ..Default::default()
        }));
        let tenant_id = Uuid::new_v4();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let params = params();
                tokio::spawn(async move { registry.acquire(tenant_id, &params).await })
            })
            .collect();
        let handles: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pool_count(), 1);
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(handle, &handles[0]));
        }
    }

    #[tokio::test]
    async fn distinct_tenants_get_distinct_pools() {
        let registry = PoolRegistry::new(TestConnector::default());
        let a = registry.acquire(Uuid::new_v4(), &params()).await.unwrap();
        let b = registry.acquire(Uuid::new_v4(), &params()).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.pool_count(), 2);
    }

    #[tokio::test]
    async fn failed_initialization_registers_nothing() {
        let registry = PoolRegistry::new(TestConnector {
            fail_first: AtomicUsize::new(1),
            ..Default::default()
        });
        let tenant_id = Uuid::new_v4();

        let err = registry.acquire(tenant_id, &params()).await.unwrap_err();
        assert!(matches!(err, PoolError::Init(_)));
        assert_eq!(registry.pool_count(), 0);
        assert!(registry.metrics(tenant_id).is_none());

        // A later attempt is a fresh first-time creation.
        assert!(registry.acquire(tenant_id, &params()).await.is_ok());
        assert_eq!(registry.pool_count(), 1);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_safe_on_unknown_ids() {
        let registry = PoolRegistry::new(TestConnector::default());
        let tenant_id = Uuid::new_v4();
        registry.acquire(tenant_id, &params()).await.unwrap();

        assert!(registry.release(tenant_id).await);
        assert!(!registry.release(tenant_id).await);
        assert!(!registry.release(Uuid::new_v4()).await);
        assert_eq!(registry.pool_count(), 0);
        assert!(registry.metrics(tenant_id).is_none());
    }

    #[tokio::test]
    async fn metrics_track_acquires() {
        let registry = PoolRegistry::new(TestConnector::default());
        let tenant_id = Uuid::new_v4();
        registry.acquire(tenant_id, &params()).await.unwrap();
        registry.acquire(tenant_id, &params()).await.unwrap();

        let metrics = registry.metrics(tenant_id).unwrap();
        assert_eq!(metrics.pool_size, 5);
        assert_eq!(metrics.acquire_count, 2);
        assert_eq!(metrics.release_count, 0);
        assert!(metrics.last_acquire_latency.is_some());
        assert_eq!(registry.all_metrics().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let registry = PoolRegistry::new(TestConnector::default());
        for _ in 0..3 {
            registry.acquire(Uuid::new_v4(), &params()).await.unwrap();
        }
        let failures = registry.shutdown().await;
        assert!(failures.is_empty());
        assert_eq!(registry.pool_count(), 0);
    }
}
