//! Per-request tenant execution context.

use std::sync::Arc;
use uuid::Uuid;

use crate::directory::ConnectionParams;
use crate::registry::PoolHandle;

/// Everything downstream business logic needs to talk to one tenant: identity,
/// routing key, connection parameters, and the tenant's pool. Built fresh by
/// the resolver for every request and owned by that request; never shared
/// across requests for different tenants.
pub struct TenantExecutionContext<P> {
    tenant_id: Uuid,
    subdomain: String,
    params: ConnectionParams,
    handle: Arc<PoolHandle<P>>,
}

impl<P> TenantExecutionContext<P> {
    pub(crate) fn new(
        tenant_id: Uuid,
        subdomain: String,
        params: ConnectionParams,
        handle: Arc<PoolHandle<P>>,
    ) -> Self {
        TenantExecutionContext {
            tenant_id,
            subdomain,
            params,
            handle,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn subdomain(&self) -> &str {
        &self.subdomain
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn pool(&self) -> &P {
        self.handle.pool()
    }
}

impl<P> Drop for TenantExecutionContext<P> {
    fn drop(&mut self) {
        // The request is done with the pool; feed the release counter.
        self.handle.note_release();
    }
}

impl<P> std::fmt::Debug for TenantExecutionContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantExecutionContext")
            .field("tenant_id", &self.tenant_id)
            .field("subdomain", &self.subdomain)
            .field("params", &self.params)
            .finish()
    }
}
