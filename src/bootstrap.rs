//! Process lifecycle wiring: build the tenancy services once at start, shut
//! the pool registry down once at the end. No ambient globals; everything is
//! passed in explicitly.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::RoutingCache;
use crate::config::TenancyConfig;
use crate::crypto::CredentialCipher;
use crate::directory::PgTenantDirectory;
use crate::error::{DirectoryError, PoolError};
use crate::extract::TenancyState;
use crate::lifecycle::{TenantAdmin, TenantLifecycle};
use crate::registry::{PgConnector, PoolRegistry};
use crate::resolver::TenantResolver;

/// The wired-up tenancy core for a PostgreSQL deployment.
pub struct Tenancy {
    pub directory: PgTenantDirectory,
    pub cache: RoutingCache,
    pub registry: Arc<PoolRegistry<PgConnector>>,
    pub resolver: Arc<TenantResolver<PgConnector>>,
    pub cipher: CredentialCipher,
}

impl Tenancy {
    /// Connect to the central database, ensure the directory table, and wire
    /// cache, registry and resolver together. Call once at process start.
    pub async fn init(config: &TenancyConfig) -> Result<Self, DirectoryError> {
        let central_pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.directory_url)
            .await?;
        let directory = PgTenantDirectory::new(central_pool, config.directory_schema.clone());
        directory.ensure_table().await?;

        let cipher = CredentialCipher::from_secret(&config.credential_secret);
        let cache = RoutingCache::in_memory(config.cache_ttl);
        let registry = Arc::new(PoolRegistry::new_pg());
        let resolver = Arc::new(TenantResolver::new(
            Arc::new(directory.clone()),
            cache.clone(),
            registry.clone(),
            cipher.clone(),
            config.base_domain.clone(),
            config.resolve_deadline,
        ));
        tracing::info!(
            schema = %config.directory_schema,
            base_domain = %config.base_domain,
            "tenancy core initialized"
        );
        Ok(Tenancy {
            directory,
            cache,
            registry,
            resolver,
            cipher,
        })
    }

    /// State handle for mounting the axum extractor.
    pub fn state(&self) -> TenancyState {
        TenancyState {
            resolver: self.resolver.clone(),
        }
    }

    /// Lifecycle orchestrator over the same cache/registry, with the given
    /// physical-database admin.
    pub fn lifecycle(&self, admin: Arc<dyn TenantAdmin>) -> TenantLifecycle<PgConnector> {
        TenantLifecycle::new(
            self.directory.clone(),
            self.cache.clone(),
            self.registry.clone(),
            admin,
            self.cipher.clone(),
        )
    }

    /// Drain every tenant pool. Call exactly once at graceful termination;
    /// returns per-tenant close failures (empty when clean).
    pub async fn shutdown(&self) -> Vec<(Uuid, PoolError)> {
        self.registry.shutdown().await
    }
}
