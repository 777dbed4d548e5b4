//! Tenant Context
//!
//! Per-logical-request binding of the active tenant.
//!
//! The binding lives in a tokio task-local, so it follows the future it was
//! attached to across every `.await` and is never visible to other tasks,
//! even when they are polled on the same worker thread. There is no
//! process-wide "current tenant".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Tenant identifier (UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TenantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| DomainError::InvalidArgument(format!("malformed tenant id: {:?}", s)))
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Access point for the tenant bound to the current logical call chain.
pub struct TenantContext;

impl TenantContext {
    /// Run `fut` with `tenant` bound for its whole lifetime, including
    /// everything it awaits.
    pub async fn scope<F>(tenant: TenantId, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_TENANT.scope(tenant, fut).await
    }

    /// Synchronous variant of [`TenantContext::scope`].
    pub fn sync_scope<R>(tenant: TenantId, f: impl FnOnce() -> R) -> R {
        CURRENT_TENANT.sync_scope(tenant, f)
    }

    /// The bound tenant, or `None` outside any scope.
    pub fn current() -> Option<TenantId> {
        CURRENT_TENANT.try_with(|tenant| *tenant).ok()
    }

    /// The bound tenant, failing fast when storage is touched outside a scope.
    pub fn require() -> Result<TenantId, DomainError> {
        Self::current().ok_or_else(|| {
            tracing::error!("storage access attempted without a tenant context");
            DomainError::TenantContextMissing
        })
    }
}
