//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dedup::AddressInput;
use crate::domain::Money;
use crate::error::{AppError, AppResult};
use crate::ledger::LedgerAdjustment;

use super::AppState;

/// Scope under which delivery addresses are deduplicated
pub const ADDRESS_SCOPE: &str = "delivery_address";

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub adjustment_id: String,
    pub amount: Money,
    pub reason: String,
    pub authorized_by: String,
}

#[derive(Debug, Serialize)]
pub struct AdjustmentListResponse {
    pub order_id: Uuid,
    pub adjustments: Vec<LedgerAdjustment>,
}

#[derive(Debug, Serialize)]
pub struct NetTotalResponse {
    pub order_id: Uuid,
    pub net_total: Money,
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub address_id: Uuid,
    pub created: bool,
}

/// Malformed JSON bodies are validation errors (400)
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/orders/:order_id/adjustments",
            post(add_adjustment).get(list_adjustments),
        )
        .route("/orders/:order_id/net-total", get(get_net_total))
        .route("/addresses", post(resolve_address))
}

/// Append a ledger adjustment to an order
async fn add_adjustment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    payload: Result<Json<AdjustmentRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<LedgerAdjustment>)> {
    let request = json_body(payload)?;

    let adjustment = state
        .ledger
        .add_adjustment(
            order_id,
            request.amount,
            &request.reason,
            &request.authorized_by,
            &request.adjustment_id,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(adjustment)))
}

/// Adjustments of an order in insertion order
async fn list_adjustments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<AdjustmentListResponse>> {
    let adjustments = state.ledger.list_adjustments(order_id).await?;
    Ok(Json(AdjustmentListResponse {
        order_id,
        adjustments,
    }))
}

/// Base total plus all adjustments
async fn get_net_total(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<NetTotalResponse>> {
    let net_total = state.ledger.get_net_order_total(order_id).await?;
    Ok(Json(NetTotalResponse {
        order_id,
        net_total,
    }))
}

/// Resolve a delivery address to its canonical id
async fn resolve_address(
    State(state): State<AppState>,
    payload: Result<Json<AddressInput>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AddressResponse>)> {
    let input = json_body(payload)?;
    let resolved = state.dedup.resolve(ADDRESS_SCOPE, &input).await?;

    let status = if resolved.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(AddressResponse {
            address_id: resolved.id,
            created: resolved.created,
        }),
    ))
}
