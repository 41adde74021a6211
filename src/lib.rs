//! Clubdeck tenancy core: subdomain routing, tenant directory, routing cache,
//! and per-tenant PostgreSQL connection pools.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod context;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod subdomain;

pub use bootstrap::Tenancy;
pub use cache::{
    CacheEpoch, CacheStoreError, CachedRoute, MemoryRoutingStore, RoutingCache, RoutingStore,
};
pub use config::TenancyConfig;
pub use context::TenantExecutionContext;
pub use crypto::CredentialCipher;
pub use directory::{
    ConnectionParams, NewTenant, PgTenantDirectory, TenantDirectory, TenantMetadata, TenantStatus,
};
pub use error::{CryptoError, DirectoryError, LifecycleError, PoolError, ResolveError};
pub use extract::{Tenant, TenancyState, TENANT_OVERRIDE_HEADER};
pub use lifecycle::{TenantAdmin, TenantLifecycle};
pub use registry::{PgConnector, PoolConnector, PoolHandle, PoolMetrics, PoolRegistry};
pub use resolver::{RequestIdentity, ResolutionEvent, TenantResolver};
