//! Dedup Repository

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::domain::{DomainError, TenantContext};

/// Input that reduces to a canonical JSON form
pub trait Canonical {
    /// Resource kind, mixed into the content hash
    fn kind(&self) -> &'static str;

    /// Canonical payload; equal payloads denote the same resource
    fn canonicalize(&self) -> Result<serde_json::Value, DomainError>;
}

/// Dedup errors
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Canonical row for {scope_key}/{content_hash} vanished after insert conflict")]
    Vanished {
        scope_key: String,
        content_hash: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a resolve call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub id: Uuid,
    /// `true` when this call inserted the row
    pub created: bool,
}

/// SHA-256 over the kind and the compact JSON of the payload.
///
/// `serde_json` object keys are sorted, so the encoding is stable.
pub fn content_hash(kind: &str, payload: &serde_json::Value) -> Result<String, DedupError> {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(payload)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Repository for canonical resources
#[derive(Debug, Clone)]
pub struct DedupRepository {
    pool: PgPool,
}

impl DedupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return the id of the canonical row for `resource`, creating it if
    /// needed.
    ///
    /// 1. Optimistic read by `(content_hash, tenant, scope)`.
    /// 2. Insert with `ON CONFLICT DO NOTHING`; a returned id means this call
    ///    won.
    /// 3. Otherwise a concurrent writer won; re-select its row.
    pub async fn resolve<C>(&self, scope_key: &str, resource: &C) -> Result<Resolved, DedupError>
    where
        C: Canonical + ?Sized,
    {
        let tenant = TenantContext::require()?;
        let payload = resource.canonicalize()?;
        let hash = content_hash(resource.kind(), &payload)?;

        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;

        let select = r#"
            SELECT id FROM canonical_resources
            WHERE content_hash = $1 AND tenant_id = $2 AND scope_key = $3
        "#;

        let existing: Option<Uuid> = sqlx::query_scalar(select)
            .bind(&hash)
            .bind(tenant.as_uuid())
            .bind(scope_key)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(id) = existing {
            tx.commit().await?;
            return Ok(Resolved { id, created: false });
        }

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO canonical_resources (id, tenant_id, scope_key, content_hash, canonical_payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (content_hash, tenant_id, scope_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant.as_uuid())
        .bind(scope_key)
        .bind(&hash)
        .bind(&payload)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = inserted {
            tx.commit().await?;
            tracing::info!(
                tenant_id = %tenant,
                scope_key = %scope_key,
                kind = resource.kind(),
                resource_id = %id,
                "Canonical resource created"
            );
            return Ok(Resolved { id, created: true });
        }

        let winner: Option<Uuid> = sqlx::query_scalar(select)
            .bind(&hash)
            .bind(tenant.as_uuid())
            .bind(scope_key)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        match winner {
            Some(id) => {
                tracing::debug!(
                    tenant_id = %tenant,
                    scope_key = %scope_key,
                    resource_id = %id,
                    "Lost insert race; using concurrent writer's row"
                );
                Ok(Resolved { id, created: false })
            }
            None => Err(DedupError::Vanished {
                scope_key: scope_key.to_string(),
                content_hash: hash,
            }),
        }
    }

    /// Stored canonical payload by id
    pub async fn find(&self, id: Uuid) -> Result<Option<serde_json::Value>, DedupError> {
        let tenant = TenantContext::require()?;
        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;

        let payload: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT canonical_payload FROM canonical_resources
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(payload)
    }
}
