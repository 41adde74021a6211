//! Tenant resolver: the per-request pipeline from hostname to execution
//! context.
//!
//! Five linear steps, no retries, no branching back: extract identifier,
//! cache lookup, directory lookup on miss (status gate, decrypt, cache
//! populate), pool acquisition, context assembly. Each step's failure is
//! terminal for the attempt.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::{CachedRoute, RoutingCache};
use crate::context::TenantExecutionContext;
use crate::crypto::CredentialCipher;
use crate::directory::{TenantDirectory, TenantStatus};
use crate::error::ResolveError;
use crate::registry::{PoolConnector, PoolHandle, PoolRegistry};
use crate::subdomain;

/// What the HTTP layer hands us per request: the hostname, plus an optional
/// explicit tenant identifier for trusted server-to-server calls where
/// hostname parsing does not apply. A well-formed override wins.
#[derive(Clone, Debug)]
pub struct RequestIdentity {
    pub hostname: String,
    pub tenant_override: Option<String>,
}

impl RequestIdentity {
    pub fn from_hostname(hostname: impl Into<String>) -> Self {
        RequestIdentity {
            hostname: hostname.into(),
            tenant_override: None,
        }
    }

    pub fn with_override(mut self, subdomain: impl Into<String>) -> Self {
        self.tenant_override = Some(subdomain.into());
        self
    }
}

/// Emitted after a context is assembled so collaborators (role seeding, usage
/// accounting) can react off the critical path. Dropped receivers are ignored.
#[derive(Clone, Debug)]
pub enum ResolutionEvent {
    TenantResolved { tenant_id: Uuid, subdomain: String },
}

/// Request-time orchestrator. Construct once at process start with explicit
/// dependencies and share it; it owns no request state.
pub struct TenantResolver<C: PoolConnector> {
    directory: Arc<dyn TenantDirectory>,
    cache: RoutingCache,
    registry: Arc<PoolRegistry<C>>,
    cipher: CredentialCipher,
    base_domain: String,
    deadline: Duration,
    events: Option<mpsc::UnboundedSender<ResolutionEvent>>,
}

impl<C: PoolConnector> TenantResolver<C> {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        cache: RoutingCache,
        registry: Arc<PoolRegistry<C>>,
        cipher: CredentialCipher,
        base_domain: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        TenantResolver {
            directory,
            cache,
            registry,
            cipher,
            base_domain: base_domain.into(),
            deadline,
            events: None,
        }
    }

    /// Attach an event channel for post-resolution collaborators.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ResolutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<C>> {
        &self.registry
    }

    pub fn cache(&self) -> &RoutingCache {
        &self.cache
    }

    /// Resolve one request to a tenant execution context, or fail with one of
    /// the typed terminal errors. Directory lookup and pool acquisition
    /// together are bounded by the configured deadline; the advisory cache
    /// lookup sits outside it and bounds itself internally.
    pub async fn resolve(
        &self,
        identity: &RequestIdentity,
    ) -> Result<TenantExecutionContext<C::Pool>, ResolveError> {
        let subdomain = self.extract_identifier(identity)?;

        let cached = self.cache.get(&subdomain).await;
        let outcome = tokio::time::timeout(
            self.deadline,
            self.route_and_acquire(&subdomain, cached),
        )
        .await;
        let (route, handle) = match outcome {
            Ok(result) => result?,
            Err(_) => return Err(ResolveError::Timeout(subdomain)),
        };

        let context =
            TenantExecutionContext::new(route.tenant_id, subdomain.clone(), route.params, handle);
        if let Some(events) = &self.events {
            let _ = events.send(ResolutionEvent::TenantResolved {
                tenant_id: context.tenant_id(),
                subdomain,
            });
        }
        Ok(context)
    }

    /// Step 1: identifier extraction and strict validation. Runs before any
    /// cache or directory access.
    fn extract_identifier(&self, identity: &RequestIdentity) -> Result<String, ResolveError> {
        if let Some(explicit) = &identity.tenant_override {
            if !subdomain::is_valid(explicit) {
                return Err(ResolveError::BadIdentifier(explicit.clone()));
            }
            return Ok(explicit.clone());
        }
        let candidate = subdomain::from_hostname(&identity.hostname, &self.base_domain)
            .ok_or_else(|| ResolveError::BadIdentifier(identity.hostname.clone()))?;
        if !subdomain::is_valid(&candidate) {
            return Err(ResolveError::BadIdentifier(candidate));
        }
        Ok(candidate)
    }

    /// Steps 3-4: directory fallback on a miss, then pool acquisition.
    async fn route_and_acquire(
        &self,
        subdomain: &str,
        cached: Option<CachedRoute>,
    ) -> Result<(CachedRoute, Arc<PoolHandle<C::Pool>>), ResolveError> {
        let route = match cached {
            Some(hit) => hit,
            None => self.lookup_and_cache(subdomain).await?,
        };

        let handle = self
            .registry
            .acquire(route.tenant_id, &route.params)
            .await
            .map_err(|source| ResolveError::PoolUnavailable {
                subdomain: subdomain.to_string(),
                source,
            })?;
        Ok((route, handle))
    }

    /// Step 3 on a cache miss: one directory fetch feeds both credential
    /// decryption and the registry key, then populates the cache. The epoch
    /// captured before the fetch keeps a concurrent invalidation authoritative:
    /// if the key is invalidated while we hold a pre-flip row, the write is
    /// refused and the next request goes back to the directory.
    async fn lookup_and_cache(&self, subdomain: &str) -> Result<CachedRoute, ResolveError> {
        let epoch = self.cache.epoch(subdomain);
        let metadata = self
            .directory
            .find_by_subdomain(subdomain)
            .await?
            .ok_or_else(|| ResolveError::TenantNotFound(subdomain.to_string()))?;

        if metadata.status != TenantStatus::Active {
            // A stale entry may still exist if the status flip raced us.
            self.cache.invalidate(subdomain).await;
            return Err(ResolveError::TenantUnavailable {
                subdomain: subdomain.to_string(),
                status: metadata.status,
            });
        }

        let params = metadata.decrypt_credentials(&self.cipher).map_err(|e| {
            tracing::error!(
                subdomain,
                tenant_id = %metadata.id,
                error = %e,
                "tenant credentials failed decryption"
            );
            ResolveError::CredentialsCorrupt(subdomain.to_string())
        })?;

        let route = CachedRoute {
            tenant_id: metadata.id,
            params,
        };
        self.cache.set_if_unchanged(subdomain, route.clone(), epoch).await;
        Ok(route)
    }
}
