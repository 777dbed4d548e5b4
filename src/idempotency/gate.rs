//! Idempotency Gate
//!
//! Two-phase locking around a write request:
//!
//! 1. A short transaction lock-selects the record for `(tenant, key)`,
//!    decides what to do, writes a STARTED marker when the caller may
//!    proceed, and commits.
//! 2. After business logic, a second transaction records COMPLETED (with
//!    the response for replay) or FAILED.
//!
//! No transaction is held across business logic. Between the two phases a
//! STARTED record exists with no lock held; if the process dies there, the
//! only recovery path is the lease: once `lease` has elapsed since
//! `locked_at`, the next caller takes the record over. A slow (not dead)
//! caller can therefore overlap with a takeover for a bounded window, but
//! its outcome is discarded: phase two only writes while the row still
//! carries the caller's `LeaseToken`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

use crate::db;
use crate::domain::TenantContext;

use super::repository::{
    IdempotencyError, IdempotencyRecord, IdempotencyRepository, IdempotencyStatus, LeaseToken,
    StoredResponse,
};

/// Lease after which a STARTED record is considered abandoned
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

const MAX_KEY_LENGTH: usize = 255;

/// What the gate does with an existing record
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Completed earlier: return the stored response, skip business logic
    Replay(StoredResponse),
    /// Another caller holds a fresh lease
    InFlight,
    /// Stale lease or failed attempt: reclaim and execute
    TakeOver,
    /// Same key, different request
    FingerprintMismatch,
}

/// Decide how to treat an existing record.
///
/// A STARTED record is in flight while `now - locked_at < lease`; at exactly
/// `lease` it is stale. A `locked_at` in the future counts as in flight.
pub fn decide(
    record: &IdempotencyRecord,
    request_hash: Option<&str>,
    now: DateTime<Utc>,
    lease: Duration,
) -> GateDecision {
    if let (Some(stored), Some(incoming)) = (record.request_hash.as_deref(), request_hash) {
        if stored != incoming {
            return GateDecision::FingerprintMismatch;
        }
    }

    match record.status {
        IdempotencyStatus::Completed => GateDecision::Replay(record.stored_response()),
        IdempotencyStatus::Failed => GateDecision::TakeOver,
        IdempotencyStatus::Started => {
            let fresh = match now.signed_duration_since(record.locked_at).to_std() {
                Ok(elapsed) => elapsed < lease,
                Err(_) => true,
            };
            if fresh {
                GateDecision::InFlight
            } else {
                GateDecision::TakeOver
            }
        }
    }
}

/// Result of the first gate phase
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Caller owns the key now and must run business logic, then report
    /// the outcome with this token
    Proceed(LeaseToken),
    /// Request already handled; return this response as-is
    Replay(StoredResponse),
}

/// Request-level exactly-once enforcement
#[derive(Debug, Clone)]
pub struct IdempotencyGate {
    repository: IdempotencyRepository,
    lease: Duration,
}

impl IdempotencyGate {
    pub fn new(pool: PgPool) -> Self {
        Self::with_lease(pool, DEFAULT_LEASE)
    }

    pub fn with_lease(pool: PgPool, lease: Duration) -> Self {
        Self {
            repository: IdempotencyRepository::new(pool),
            lease,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn repository(&self) -> &IdempotencyRepository {
        &self.repository
    }

    /// Phase one: lock, decide, mark STARTED when proceeding, commit.
    pub async fn begin(
        &self,
        key: &str,
        request_hash: Option<&str>,
    ) -> Result<GateOutcome, IdempotencyError> {
        validate_key(key)?;
        let tenant = TenantContext::require()?;
        let now = Utc::now();

        let mut tx = db::begin_tenant_transaction(self.repository.pool(), tenant).await?;

        let existing = match self.repository.lock(&mut tx, tenant, key).await? {
            Some(record) => record,
            None => {
                if let Some(lease) = self
                    .repository
                    .insert_started(&mut tx, tenant, key, request_hash, now)
                    .await?
                {
                    tx.commit().await?;
                    tracing::debug!(
                        tenant_id = %tenant,
                        idempotency_key = %key,
                        "Idempotency key registered"
                    );
                    return Ok(GateOutcome::Proceed(lease));
                }

                // A concurrent caller inserted first; its row is committed now.
                match self.repository.lock(&mut tx, tenant, key).await? {
                    Some(record) => record,
                    None => return Err(IdempotencyError::NotFound(key.to_string())),
                }
            }
        };

        match decide(&existing, request_hash, now, self.lease) {
            GateDecision::Replay(response) => {
                tx.commit().await?;
                tracing::info!(
                    tenant_id = %tenant,
                    idempotency_key = %key,
                    status = response.status,
                    "Replaying stored response"
                );
                Ok(GateOutcome::Replay(response))
            }
            GateDecision::InFlight => {
                tx.rollback().await?;
                tracing::warn!(
                    tenant_id = %tenant,
                    idempotency_key = %key,
                    "Request already in flight"
                );
                Err(IdempotencyError::InFlight(key.to_string()))
            }
            GateDecision::FingerprintMismatch => {
                tx.rollback().await?;
                tracing::warn!(
                    tenant_id = %tenant,
                    idempotency_key = %key,
                    "Idempotency key reused with a different request"
                );
                Err(IdempotencyError::FingerprintMismatch(key.to_string()))
            }
            GateDecision::TakeOver => {
                let lease = self.repository.take_over(&mut tx, tenant, key, now).await?;
                tx.commit().await?;
                tracing::warn!(
                    tenant_id = %tenant,
                    idempotency_key = %key,
                    previous_status = %existing.status,
                    locked_at = %existing.locked_at,
                    "Took over idempotency key"
                );
                Ok(GateOutcome::Proceed(lease))
            }
        }
    }

    /// Phase two, success: store the response for replay.
    ///
    /// Fails with `LeaseLost` if the record was taken over since `begin`.
    pub async fn complete(
        &self,
        key: &str,
        lease: &LeaseToken,
        response: &StoredResponse,
    ) -> Result<(), IdempotencyError> {
        self.repository.mark_completed(key, lease, response).await
    }

    /// Phase two, failure: allow the next retry to take over
    pub async fn fail(&self, key: &str, lease: &LeaseToken) -> Result<(), IdempotencyError> {
        self.repository.mark_failed(key, lease).await
    }

    /// Run `operation` at most once per key.
    ///
    /// Replays the stored response when the key already completed. If
    /// recording the outcome fails after the operation succeeded, the
    /// response is still returned and the failure is logged; the record
    /// stays STARTED until its lease expires.
    pub async fn run<F, Fut, E>(
        &self,
        key: &str,
        request_hash: Option<&str>,
        operation: F,
    ) -> Result<StoredResponse, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredResponse, E>>,
        E: From<IdempotencyError>,
    {
        let lease = match self.begin(key, request_hash).await? {
            GateOutcome::Replay(response) => return Ok(response),
            GateOutcome::Proceed(lease) => lease,
        };

        match operation().await {
            Ok(response) => {
                if let Err(e) = self.complete(key, &lease, &response).await {
                    tracing::error!(
                        idempotency_key = %key,
                        error = %e,
                        "Failed to record completed response"
                    );
                }
                Ok(response)
            }
            Err(err) => {
                if let Err(e) = self.fail(key, &lease).await {
                    tracing::error!(
                        idempotency_key = %key,
                        error = %e,
                        "Failed to mark idempotency key as failed"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Keys are 1..=255 visible ASCII characters
pub(crate) fn validate_key(key: &str) -> Result<(), IdempotencyError> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(IdempotencyError::InvalidKey(format!(
            "key length must be between 1 and {}",
            MAX_KEY_LENGTH
        )));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(IdempotencyError::InvalidKey(
            "key must contain visible ASCII characters only".to_string(),
        ));
    }
    Ok(())
}
