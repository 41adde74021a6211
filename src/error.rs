//! Typed errors and HTTP mapping.

use crate::directory::TenantStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the tenant directory client (central database access).
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("directory query: {0}")]
    Query(#[from] sqlx::Error),
    #[error("directory: {0}")]
    Other(String),
}

/// Credential cipher failures. `Malformed` covers anything that is not the
/// three-part `iv:tag:data` hex format; `AuthFailed` is a tag mismatch.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),
    #[error("decryption failed: authentication tag mismatch")]
    AuthFailed,
}

/// Pool registry failures.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool initialization failed: {0}")]
    Init(String),
    #[error("pool close failed: {0}")]
    Close(String),
}

/// Tenant lifecycle failures (provisioning and status changes).
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("invalid subdomain: {0}")]
    BadSubdomain(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("provisioning step '{step}' failed: {message}")]
    Admin { step: &'static str, message: String },
}

/// Terminal outcomes of one resolution attempt. Each variant maps to exactly
/// one outward code so clients can tell "tenant doesn't exist" apart from
/// "try again later".
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("bad tenant identifier: {0}")]
    BadIdentifier(String),
    #[error("no tenant for subdomain '{0}'")]
    TenantNotFound(String),
    #[error("tenant '{subdomain}' is {status}")]
    TenantUnavailable {
        subdomain: String,
        status: TenantStatus,
    },
    #[error("stored credentials for tenant '{0}' failed decryption")]
    CredentialsCorrupt(String),
    #[error("pool for tenant '{subdomain}' unavailable: {source}")]
    PoolUnavailable {
        subdomain: String,
        #[source]
        source: PoolError,
    },
    #[error("resolution of '{0}' exceeded its deadline")]
    Timeout(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl ResolveError {
    /// Whether the caller may retry with backoff. Only pool initialization
    /// failures and deadline overruns are plausibly transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::PoolUnavailable { .. } | ResolveError::Timeout(_)
        )
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ResolveError::BadIdentifier(_) => (StatusCode::BAD_REQUEST, "bad_identifier"),
            ResolveError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "tenant_not_found"),
            ResolveError::TenantUnavailable { .. } => (StatusCode::FORBIDDEN, "tenant_unavailable"),
            ResolveError::CredentialsCorrupt(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "credentials_corrupt")
            }
            ResolveError::PoolUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "pool_unavailable")
            }
            ResolveError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "resolution_timeout"),
            ResolveError::Directory(_) => (StatusCode::INTERNAL_SERVER_ERROR, "directory_error"),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                retryable: self.is_retryable().then_some(true),
            },
        };
        (status, Json(body)).into_response()
    }
}
