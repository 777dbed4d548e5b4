//! Idempotency Repository
//!
//! Persistence for idempotency records. Records are created on first sight
//! of a key and overwritten afterwards; they are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::fmt;
use std::str::FromStr;

use crate::db;
use crate::domain::{DomainError, TenantContext, TenantId};

/// Idempotency record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Started,
    Completed,
    Failed,
}

impl FromStr for IdempotencyStatus {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(IdempotencyStatus::Started),
            "completed" => Ok(IdempotencyStatus::Completed),
            "failed" => Ok(IdempotencyStatus::Failed),
            other => Err(IdempotencyError::InvalidKey(format!(
                "unknown idempotency status {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdempotencyStatus::Started => write!(f, "started"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Response captured for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Stored idempotency record
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub tenant_id: TenantId,
    pub key: String,
    pub status: IdempotencyStatus,
    pub request_hash: Option<String>,
    pub locked_at: DateTime<Utc>,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
}

impl IdempotencyRecord {
    /// The replayable response of a COMPLETED record
    pub fn stored_response(&self) -> StoredResponse {
        StoredResponse {
            status: self
                .response_status
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(200),
            body: self
                .response_body
                .clone()
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Idempotency Error
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Request already in flight for key {0}")]
    InFlight(String),

    #[error("Request fingerprint mismatch for key {0}")]
    FingerprintMismatch(String),

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Lease on key {0} was taken over by another caller")]
    LeaseLost(String),
}

/// Proof of ownership of a STARTED record.
///
/// Holds the `locked_at` written when the caller acquired the record; the
/// outcome is only recorded while the row still carries the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseToken {
    locked_at: DateTime<Utc>,
}

impl LeaseToken {
    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }
}

type RecordRow = (
    uuid::Uuid,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<i32>,
    Option<serde_json::Value>,
);

fn record_from_row(row: RecordRow) -> Result<IdempotencyRecord, IdempotencyError> {
    let (tenant_id, key, status, request_hash, locked_at, response_status, response_body) = row;
    Ok(IdempotencyRecord {
        tenant_id: TenantId::new(tenant_id),
        key,
        status: status.parse()?,
        request_hash,
        locked_at,
        response_status,
        response_body,
    })
}

/// Repository for idempotency records
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Read a record without locking it
    pub async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let tenant = TenantContext::require()?;
        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, key, status, request_hash, locked_at, response_status, response_body
            FROM idempotency_keys
            WHERE tenant_id = $1 AND key = $2
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        row.map(record_from_row).transpose()
    }

    /// Select the record with a row lock held until `tx` ends
    pub async fn lock(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, key, status, request_hash, locked_at, response_status, response_body
            FROM idempotency_keys
            WHERE tenant_id = $1 AND key = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// Insert a STARTED record. Returns `None` if a concurrent caller
    /// inserted the same key first.
    pub async fn insert_started(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        key: &str,
        request_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<LeaseToken>, IdempotencyError> {
        let locked_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_keys (tenant_id, key, status, request_hash, locked_at)
            VALUES ($1, $2, 'started', $3, $4)
            ON CONFLICT (tenant_id, key) DO NOTHING
            RETURNING locked_at
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(key)
        .bind(request_hash)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(locked_at.map(|locked_at| LeaseToken { locked_at }))
    }

    /// Reclaim a stale STARTED or FAILED record for a new execution.
    ///
    /// The new `locked_at` always differs from the previous owner's, so the
    /// previous owner's token stops matching.
    pub async fn take_over(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaseToken, IdempotencyError> {
        let locked_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE idempotency_keys
            SET status = 'started',
                locked_at = GREATEST($3, locked_at + INTERVAL '1 microsecond'),
                response_status = NULL, response_body = NULL, updated_at = NOW()
            WHERE tenant_id = $1 AND key = $2
            RETURNING locked_at
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(key)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        locked_at
            .map(|locked_at| LeaseToken { locked_at })
            .ok_or_else(|| IdempotencyError::NotFound(key.to_string()))
    }

    /// Record the outcome of business logic in its own transaction
    pub async fn mark_completed(
        &self,
        key: &str,
        lease: &LeaseToken,
        response: &StoredResponse,
    ) -> Result<(), IdempotencyError> {
        self.finish(key, lease, IdempotencyStatus::Completed, Some(response))
            .await
    }

    /// Mark the record FAILED so the next caller may take it over
    pub async fn mark_failed(&self, key: &str, lease: &LeaseToken) -> Result<(), IdempotencyError> {
        self.finish(key, lease, IdempotencyStatus::Failed, None).await
    }

    /// Only a STARTED row still stamped with `lease` is updated; a caller
    /// whose record was taken over gets `LeaseLost` and changes nothing.
    async fn finish(
        &self,
        key: &str,
        lease: &LeaseToken,
        status: IdempotencyStatus,
        response: Option<&StoredResponse>,
    ) -> Result<(), IdempotencyError> {
        let tenant = TenantContext::require()?;
        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;

        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = $3, response_status = $4, response_body = $5, updated_at = NOW()
            WHERE tenant_id = $1 AND key = $2 AND status = 'started' AND locked_at = $6
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(key)
        .bind(status.to_string())
        .bind(response.map(|r| r.status as i32))
        .bind(response.map(|r| r.body.clone()))
        .bind(lease.locked_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            tx.rollback().await?;
            tracing::warn!(
                tenant_id = %tenant,
                idempotency_key = %key,
                locked_at = %lease.locked_at,
                outcome = %status,
                "Idempotency lease lost before recording outcome"
            );
            return Err(IdempotencyError::LeaseLost(key.to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Compute SHA-256 fingerprint of a request for key-reuse detection
    pub fn compute_request_hash(method: &str, path: &str, body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_status_round_trip() {
        for status in [
            IdempotencyStatus::Started,
            IdempotencyStatus::Completed,
            IdempotencyStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<IdempotencyStatus>().unwrap(), status);
        }
        assert!("processing".parse::<IdempotencyStatus>().is_err());
    }

    #[test]
    fn test_compute_request_hash() {
        let hash = IdempotencyRepository::compute_request_hash("POST", "/a", b"{\"x\":1}");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            IdempotencyRepository::compute_request_hash("POST", "/a", b"{\"x\":1}")
        );
        assert_ne!(
            hash,
            IdempotencyRepository::compute_request_hash("POST", "/b", b"{\"x\":1}")
        );
        assert_ne!(
            hash,
            IdempotencyRepository::compute_request_hash("PUT", "/a", b"{\"x\":1}")
        );
    }

    #[test]
    fn test_stored_response_defaults() {
        let record = IdempotencyRecord {
            tenant_id: TenantId::new(uuid::Uuid::new_v4()),
            key: "k".to_string(),
            status: IdempotencyStatus::Completed,
            request_hash: None,
            locked_at: Utc::now(),
            response_status: Some(201),
            response_body: None,
        };
        assert_eq!(
            record.stored_response(),
            StoredResponse {
                status: 201,
                body: serde_json::Value::Null
            }
        );
    }
}
