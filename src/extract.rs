//! axum boundary: shared tenancy state and a per-request tenant extractor.

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::HOST, request::Parts},
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::context::TenantExecutionContext;
use crate::error::ResolveError;
use crate::registry::PgConnector;
use crate::resolver::{RequestIdentity, TenantResolver};

/// Header carrying an explicit tenant identifier for trusted server-to-server
/// calls. When present it takes precedence over hostname parsing; strip it
/// from untrusted traffic at the edge.
pub const TENANT_OVERRIDE_HEADER: &str = "X-Clubdeck-Tenant";

/// Shared handle to the resolver, cloned into every route.
#[derive(Clone)]
pub struct TenancyState {
    pub resolver: Arc<TenantResolver<PgConnector>>,
}

/// Extractor running the full resolution pipeline for the request. Rejections
/// are [`ResolveError`] values, already mapped to status codes.
pub struct Tenant(pub TenantExecutionContext<PgPool>);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    TenancyState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ResolveError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let hostname = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let tenant_override = parts
            .headers
            .get(TENANT_OVERRIDE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let identity = RequestIdentity {
            hostname,
            tenant_override,
        };
        let state = TenancyState::from_ref(state);
        state.resolver.resolve(&identity).await.map(Tenant)
    }
}
