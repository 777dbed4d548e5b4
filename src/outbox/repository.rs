//! Outbox Repository
//!
//! `emit` runs inside the caller's transaction; `process_batch` claims due
//! rows with `FOR UPDATE SKIP LOCKED` so several workers can drain the table
//! without publishing a row twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{OrderEvent, TenantId};

use super::Publisher;

/// Outbox event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::InvalidRow(format!("unknown status {:?}", other))),
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "pending"),
            OutboxStatus::Published => write!(f, "published"),
            OutboxStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outbox errors
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid outbox row: {0}")]
    InvalidRow(String),
}

/// Event to be written into the outbox
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub tenant_id: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new(
        tenant_id: TenantId,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn from_order_event(tenant_id: TenantId, event: &OrderEvent) -> Result<Self, OutboxError> {
        Ok(Self::new(
            tenant_id,
            OrderEvent::AGGREGATE_TYPE,
            event.order_id().to_string(),
            event.event_type(),
            serde_json::to_value(event)?,
        ))
    }
}

/// Stored outbox event
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Retry ceiling and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

impl RetryPolicy {
    /// `2^retry_count` seconds
    pub fn backoff(&self, retry_count: i32) -> chrono::Duration {
        let exponent = retry_count.clamp(0, 30) as u32;
        chrono::Duration::seconds(1i64 << exponent)
    }
}

/// State change applied to a claimed event
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Published,
    Retry {
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    },
    DeadLetter {
        retry_count: i32,
    },
}

/// Decide the next state of a claimed event after a publish attempt.
///
/// A failed attempt increments `retry_count`; reaching `max_retries`
/// dead-letters the event, otherwise it is due again after
/// `2^retry_count` seconds (using the incremented count).
pub fn plan_transition(
    event: &OutboxEvent,
    published: bool,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Transition {
    if published {
        return Transition::Published;
    }

    let retry_count = event.retry_count + 1;
    if retry_count >= policy.max_retries {
        Transition::DeadLetter { retry_count }
    } else {
        Transition::Retry {
            retry_count,
            next_attempt_at: now + policy.backoff(retry_count),
        }
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

const NOT_ACKNOWLEDGED: &str = "publish not acknowledged";

type OutboxRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    serde_json::Value,
    String,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<String>,
);

fn event_from_row(row: OutboxRow) -> Result<OutboxEvent, OutboxError> {
    let (
        id,
        tenant_id,
        aggregate_type,
        aggregate_id,
        event_type,
        payload,
        status,
        retry_count,
        next_attempt_at,
        created_at,
        processed_at,
        last_error,
    ) = row;

    Ok(OutboxEvent {
        id,
        tenant_id: TenantId::new(tenant_id),
        aggregate_type,
        aggregate_id,
        event_type,
        payload,
        status: status.parse()?,
        retry_count,
        next_attempt_at,
        created_at,
        processed_at,
        last_error,
    })
}

/// Insert a PENDING event inside the caller's transaction.
///
/// The event commits or rolls back together with the business write.
pub async fn emit(
    tx: &mut Transaction<'_, Postgres>,
    event: NewOutboxEvent,
) -> Result<Uuid, OutboxError> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO outbox_events (
            id, tenant_id, aggregate_type, aggregate_id, event_type, payload,
            status, retry_count, next_attempt_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, NOW())
        "#,
    )
    .bind(id)
    .bind(event.tenant_id.as_uuid())
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(&event.event_type)
    .bind(&event.payload)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        event_id = %id,
        tenant_id = %event.tenant_id,
        aggregate_type = %event.aggregate_type,
        aggregate_id = %event.aggregate_id,
        event_type = %event.event_type,
        "Outbox event emitted"
    );

    Ok(id)
}

/// Repository for draining the outbox
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: PgPool,
    policy: RetryPolicy,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_policy(pool, RetryPolicy::default())
    }

    pub fn with_policy(pool: PgPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch one event by id
    pub async fn get(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let row: Option<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, aggregate_type, aggregate_id, event_type, payload,
                   status, retry_count, next_attempt_at, created_at, processed_at, last_error
            FROM outbox_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    /// Claim up to `batch_size` due events, publish them, and record every
    /// outcome in the same transaction.
    ///
    /// A crash before commit leaves the whole batch PENDING, so it is simply
    /// claimed again by the next poll.
    pub async fn process_batch<P>(
        &self,
        batch_size: i64,
        publisher: &P,
    ) -> Result<BatchReport, OutboxError>
    where
        P: Publisher + ?Sized,
    {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let events = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, tenant_id, aggregate_type, aggregate_id, event_type, payload,
                   status, retry_count, next_attempt_at, created_at, processed_at, last_error
            FROM outbox_events
            WHERE status = 'pending' AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC, created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(event_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        if events.is_empty() {
            tx.commit().await?;
            return Ok(BatchReport::default());
        }

        let published: HashSet<Uuid> = publisher.publish(&events).await;

        let mut report = BatchReport {
            claimed: events.len(),
            ..BatchReport::default()
        };

        for event in &events {
            match plan_transition(event, published.contains(&event.id), now, &self.policy) {
                Transition::Published => {
                    sqlx::query(
                        r#"
                        UPDATE outbox_events
                        SET status = 'published', processed_at = $2, last_error = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(event.id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    report.published += 1;
                }
                Transition::Retry {
                    retry_count,
                    next_attempt_at,
                } => {
                    sqlx::query(
                        r#"
                        UPDATE outbox_events
                        SET status = 'pending', retry_count = $2, next_attempt_at = $3,
                            last_error = $4
                        WHERE id = $1
                        "#,
                    )
                    .bind(event.id)
                    .bind(retry_count)
                    .bind(next_attempt_at)
                    .bind(NOT_ACKNOWLEDGED)
                    .execute(&mut *tx)
                    .await?;
                    report.retried += 1;
                }
                Transition::DeadLetter { retry_count } => {
                    sqlx::query(
                        r#"
                        UPDATE outbox_events
                        SET status = 'failed', retry_count = $2, processed_at = $3,
                            last_error = $4
                        WHERE id = $1
                        "#,
                    )
                    .bind(event.id)
                    .bind(retry_count)
                    .bind(now)
                    .bind(NOT_ACKNOWLEDGED)
                    .execute(&mut *tx)
                    .await?;
                    tracing::error!(
                        event_id = %event.id,
                        tenant_id = %event.tenant_id,
                        event_type = %event.event_type,
                        retry_count = retry_count,
                        "Outbox event dead-lettered"
                    );
                    report.dead_lettered += 1;
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            claimed = report.claimed,
            published = report.published,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "Outbox batch processed"
        );

        Ok(report)
    }
}
