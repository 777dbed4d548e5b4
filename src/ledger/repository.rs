//! Ledger Repository

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::domain::{DomainError, Money, OrderEvent, TenantContext, TenantId};
use crate::outbox::{self, NewOutboxEvent, OutboxError};

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),
}

/// One recorded adjustment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerAdjustment {
    pub id: String,
    pub tenant_id: TenantId,
    pub order_id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub authorized_by: String,
    pub created_at: DateTime<Utc>,
}

type AdjustmentRow = (
    String,
    Uuid,
    Uuid,
    Decimal,
    String,
    String,
    String,
    DateTime<Utc>,
);

fn adjustment_from_row(row: AdjustmentRow) -> Result<LedgerAdjustment, LedgerError> {
    let (id, tenant_id, order_id, amount_minor, currency, reason, authorized_by, created_at) = row;
    let amount = Money::from_decimal(amount_minor, currency.trim())
        .map_err(|e| LedgerError::CorruptRow(format!("adjustment {}: {}", id, e)))?;

    Ok(LedgerAdjustment {
        id,
        tenant_id: TenantId::new(tenant_id),
        order_id,
        amount,
        reason,
        authorized_by,
        created_at,
    })
}

/// Fold adjustments into the base total.
///
/// Any amount in a currency other than the base's fails with
/// `CurrencyMismatch`.
pub fn net_total<'a, I>(base: Money, adjustments: I) -> Result<Money, DomainError>
where
    I: IntoIterator<Item = &'a Money>,
{
    adjustments
        .into_iter()
        .try_fold(base, |total, amount| total.add(amount).map_err(DomainError::from))
}

/// Repository for the order ledger
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an adjustment and emit `OrderAdjustmentRecorded` in the same
    /// transaction.
    ///
    /// # Errors
    /// - `DuplicateAdjustment` if `adjustment_id` was already recorded
    /// - `OrderNotFound` if the order does not exist for the current tenant
    pub async fn add_adjustment(
        &self,
        order_id: Uuid,
        amount: Money,
        reason: &str,
        authorized_by: &str,
        adjustment_id: &str,
    ) -> Result<LedgerAdjustment, LedgerError> {
        if adjustment_id.trim().is_empty() {
            return Err(DomainError::InvalidArgument("adjustment_id must not be empty".into()).into());
        }
        if reason.trim().is_empty() {
            return Err(DomainError::InvalidArgument("reason must not be empty".into()).into());
        }
        if authorized_by.trim().is_empty() {
            return Err(DomainError::InvalidArgument("authorized_by must not be empty".into()).into());
        }

        let tenant = TenantContext::require()?;
        let amount_minor = amount.to_decimal().map_err(DomainError::from)?;

        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;

        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_adjustments (
                id, tenant_id, order_id, amount_minor, currency, reason, authorized_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING created_at
            "#,
        )
        .bind(adjustment_id)
        .bind(tenant.as_uuid())
        .bind(order_id)
        .bind(amount_minor)
        .bind(amount.currency().as_str())
        .bind(reason)
        .bind(authorized_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, order_id, adjustment_id))?;

        let event = OrderEvent::OrderAdjustmentRecorded {
            order_id,
            adjustment_id: adjustment_id.to_string(),
            amount,
            reason: reason.to_string(),
            authorized_by: authorized_by.to_string(),
            recorded_at: created_at,
        };
        outbox::emit(&mut tx, NewOutboxEvent::from_order_event(tenant, &event)?).await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant,
            order_id = %order_id,
            adjustment_id = %adjustment_id,
            amount = %amount,
            authorized_by = %authorized_by,
            "Ledger adjustment recorded"
        );

        Ok(LedgerAdjustment {
            id: adjustment_id.to_string(),
            tenant_id: tenant,
            order_id,
            amount,
            reason: reason.to_string(),
            authorized_by: authorized_by.to_string(),
            created_at,
        })
    }

    /// All adjustments of an order in insertion order
    pub async fn list_adjustments(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<LedgerAdjustment>, LedgerError> {
        let tenant = TenantContext::require()?;
        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;

        let rows: Vec<AdjustmentRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, order_id, amount_minor, currency, reason, authorized_by, created_at
            FROM ledger_adjustments
            WHERE tenant_id = $1 AND order_id = $2
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.into_iter().map(adjustment_from_row).collect()
    }

    /// Base order total plus every committed adjustment
    pub async fn get_net_order_total(&self, order_id: Uuid) -> Result<Money, LedgerError> {
        let tenant = TenantContext::require()?;
        let mut tx = db::begin_tenant_transaction(&self.pool, tenant).await?;

        let base: Option<(Decimal, String)> = sqlx::query_as(
            r#"
            SELECT base_total_minor, currency
            FROM orders
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(order_id)
        .bind(tenant.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let (base_minor, base_currency) =
            base.ok_or_else(|| DomainError::OrderNotFound(order_id.to_string()))?;
        let base = Money::from_decimal(base_minor, base_currency.trim())
            .map_err(|e| LedgerError::CorruptRow(format!("order {}: {}", order_id, e)))?;

        let amounts: Vec<(Decimal, String)> = sqlx::query_as(
            r#"
            SELECT amount_minor, currency
            FROM ledger_adjustments
            WHERE tenant_id = $1 AND order_id = $2
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let amounts = amounts
            .into_iter()
            .map(|(minor, currency)| {
                Money::from_decimal(minor, currency.trim())
                    .map_err(|e| LedgerError::CorruptRow(format!("order {}: {}", order_id, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total = net_total(base, &amounts)?;

        tracing::debug!(
            tenant_id = %tenant,
            order_id = %order_id,
            adjustments = amounts.len(),
            net_total = %total,
            "Computed net order total"
        );

        Ok(total)
    }
}

fn map_insert_error(err: sqlx::Error, order_id: Uuid, adjustment_id: &str) -> LedgerError {
    if db::is_unique_violation(&err) {
        tracing::warn!(adjustment_id = %adjustment_id, "Duplicate ledger adjustment rejected");
        DomainError::DuplicateAdjustment {
            adjustment_id: adjustment_id.to_string(),
        }
        .into()
    } else if db::is_foreign_key_violation(&err) {
        DomainError::OrderNotFound(order_id.to_string()).into()
    } else {
        LedgerError::Database(err)
    }
}
