//! Tenant lifecycle: provisioning with compensating rollback, plus the
//! status-change operations that keep the routing cache and pool registry
//! consistent with the directory.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::RoutingCache;
use crate::crypto::CredentialCipher;
use crate::directory::{ConnectionParams, NewTenant, PgTenantDirectory, TenantMetadata, TenantStatus};
use crate::error::LifecycleError;
use crate::registry::{PoolConnector, PoolRegistry};
use crate::subdomain;

/// Physical-database operations behind provisioning. Schema content is owned
/// elsewhere; from here these are opaque steps that either succeed or fail.
#[async_trait]
pub trait TenantAdmin: Send + Sync {
    async fn create_database(&self, params: &ConnectionParams) -> Result<(), String>;
    async fn drop_database(&self, params: &ConnectionParams) -> Result<(), String>;
    async fn apply_schema(&self, params: &ConnectionParams) -> Result<(), String>;
    async fn seed_roles(&self, params: &ConnectionParams) -> Result<(), String>;
}

/// Write-side orchestrator over the directory, cache and registry. The
/// resolver never sees provisioning; it only ever observes the finished
/// `active` row.
pub struct TenantLifecycle<C: PoolConnector> {
    directory: PgTenantDirectory,
    cache: RoutingCache,
    registry: Arc<PoolRegistry<C>>,
    admin: Arc<dyn TenantAdmin>,
    cipher: CredentialCipher,
}

impl<C: PoolConnector> TenantLifecycle<C> {
    pub fn new(
        directory: PgTenantDirectory,
        cache: RoutingCache,
        registry: Arc<PoolRegistry<C>>,
        admin: Arc<dyn TenantAdmin>,
        cipher: CredentialCipher,
    ) -> Self {
        TenantLifecycle {
            directory,
            cache,
            registry,
            admin,
            cipher,
        }
    }

    /// Provision a new tenant: write the directory row (inactive), create the
    /// physical database, apply schema, seed default roles, then flip the row
    /// to active. Any failed step rolls back what came before it (drop the
    /// database, delete the row) so no half-provisioned tenant survives.
    pub async fn provision(&self, new: NewTenant) -> Result<TenantMetadata, LifecycleError> {
        if !subdomain::is_valid(&new.subdomain) {
            return Err(LifecycleError::BadSubdomain(new.subdomain));
        }

        let mut metadata = self.directory.insert(&new, &self.cipher).await?;
        let params = ConnectionParams {
            host: new.db_host,
            port: new.db_port,
            database: new.db_name,
            user: new.db_user,
            password: new.db_password,
            pool_size: new.pool_size,
        };

        let steps: [(&'static str, _); 3] = [
            ("create_database", self.admin.create_database(&params)),
            ("apply_schema", self.admin.apply_schema(&params)),
            ("seed_roles", self.admin.seed_roles(&params)),
        ];
        let mut database_created = false;
        for (step, fut) in steps {
            if let Err(message) = fut.await {
                self.compensate(&metadata, &params, database_created).await;
                return Err(LifecycleError::Admin { step, message });
            }
            database_created = true;
        }

        self.directory
            .set_status(metadata.id, TenantStatus::Active)
            .await?;
        metadata.status = TenantStatus::Active;
        tracing::info!(tenant_id = %metadata.id, subdomain = %metadata.subdomain, "tenant provisioned");
        Ok(metadata)
    }

    async fn compensate(
        &self,
        metadata: &TenantMetadata,
        params: &ConnectionParams,
        database_created: bool,
    ) {
        if database_created {
            if let Err(message) = self.admin.drop_database(params).await {
                tracing::warn!(
                    tenant_id = %metadata.id,
                    error = %message,
                    "compensating database drop failed, manual cleanup required"
                );
            }
        }
        if let Err(e) = self.directory.delete(metadata.id).await {
            tracing::warn!(tenant_id = %metadata.id, error = %e, "compensating row delete failed");
        }
        tracing::warn!(
            tenant_id = %metadata.id,
            subdomain = %metadata.subdomain,
            "tenant provisioning rolled back"
        );
    }

    /// Suspend a tenant: flip the directory row, drop any cached route, and
    /// close its pool. Resolutions starting after this observe
    /// `TenantUnavailable`; one already in flight may still complete.
    pub async fn suspend(&self, tenant_id: Uuid, subdomain: &str) -> Result<bool, LifecycleError> {
        let found = self
            .directory
            .set_status(tenant_id, TenantStatus::Suspended)
            .await?;
        self.cache.invalidate(subdomain).await;
        self.registry.release(tenant_id).await;
        Ok(found)
    }

    /// Reactivate a suspended tenant. The next resolution repopulates the
    /// cache and reopens a pool on demand.
    pub async fn reactivate(&self, tenant_id: Uuid) -> Result<bool, LifecycleError> {
        Ok(self
            .directory
            .set_status(tenant_id, TenantStatus::Active)
            .await?)
    }

    /// Retire a tenant for good (soft: the row stays, status becomes inactive).
    pub async fn deactivate(&self, tenant_id: Uuid, subdomain: &str) -> Result<bool, LifecycleError> {
        let found = self
            .directory
            .set_status(tenant_id, TenantStatus::Inactive)
            .await?;
        self.cache.invalidate(subdomain).await;
        self.registry.release(tenant_id).await;
        Ok(found)
    }

    /// Plan change: persist the new desired pool size, then invalidate the
    /// cached route and recycle the pool so the next resolution builds one at
    /// the new size.
    pub async fn resize_pool(
        &self,
        tenant_id: Uuid,
        subdomain: &str,
        pool_size: u32,
    ) -> Result<bool, LifecycleError> {
        let found = self.directory.set_pool_size(tenant_id, pool_size).await?;
        self.cache.invalidate(subdomain).await;
        self.registry.release(tenant_id).await;
        Ok(found)
    }
}
