//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::dedup::DedupError;
use crate::domain::DomainError;
use crate::idempotency::IdempotencyError;
use crate::ledger::LedgerError;
use crate::outbox::OutboxError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Request already in flight for idempotency key {0}")]
    IdempotencyInFlight(String),

    #[error("Idempotency key {0} was already used for a different request")]
    IdempotencyKeyReused(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Storage temporarily unavailable: {0}")]
    TransientStorage(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if crate::db::is_transient(&err) {
            AppError::TransientStorage(err.to_string())
        } else {
            AppError::Database(err)
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::Database(e) => e.into(),
            IdempotencyError::Domain(e) => AppError::Domain(e),
            IdempotencyError::InFlight(key) => AppError::IdempotencyInFlight(key),
            IdempotencyError::FingerprintMismatch(key) => AppError::IdempotencyKeyReused(key),
            IdempotencyError::InvalidKey(msg) => AppError::InvalidRequest(msg),
            IdempotencyError::LeaseLost(key) => AppError::IdempotencyInFlight(key),
            IdempotencyError::NotFound(key) => {
                AppError::Internal(format!("idempotency record vanished: {}", key))
            }
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Database(e) => e.into(),
            LedgerError::Domain(e) => AppError::Domain(e),
            LedgerError::Outbox(e) => e.into(),
            LedgerError::CorruptRow(msg) => AppError::Internal(msg),
        }
    }
}

impl From<DedupError> for AppError {
    fn from(err: DedupError) -> Self {
        match err {
            DedupError::Database(e) => e.into(),
            DedupError::Domain(e) => AppError::Domain(e),
            DedupError::Vanished { .. } | DedupError::Serialization(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<OutboxError> for AppError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Database(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// HTTP status, machine-readable code and optional details
    fn classify(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            // 409 Conflict
            AppError::IdempotencyInFlight(key) => {
                (StatusCode::CONFLICT, "request_in_flight", Some(key.clone()))
            }
            AppError::IdempotencyKeyReused(key) => {
                (StatusCode::CONFLICT, "idempotency_key_reused", Some(key.clone()))
            }

            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidArgument(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_argument", Some(msg.clone()))
                }
                DomainError::CurrencyMismatch { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "currency_mismatch",
                    Some(domain_err.to_string()),
                ),
                DomainError::DuplicateAdjustment { adjustment_id } => (
                    StatusCode::CONFLICT,
                    "duplicate_adjustment",
                    Some(adjustment_id.clone()),
                ),
                DomainError::OrderNotFound(id) => {
                    (StatusCode::NOT_FOUND, "order_not_found", Some(id.clone()))
                }
                DomainError::TenantContextMissing => {
                    tracing::error!("Tenant context missing while serving a request");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
                }
            },

            // 503 Service Unavailable
            AppError::TransientStorage(msg) => {
                tracing::warn!("Transient storage error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", None)
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.classify();

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
