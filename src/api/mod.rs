//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::time::Duration;

use axum::{middleware as axum_middleware, routing::get, Router};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::dedup::DedupRepository;
use crate::idempotency::IdempotencyGate;
use crate::ledger::LedgerRepository;

pub use routes::create_router;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub gate: IdempotencyGate,
    pub ledger: LedgerRepository,
    pub dedup: DedupRepository,
}

impl AppState {
    pub fn new(pool: PgPool, idempotency_lease: Duration) -> Self {
        Self {
            gate: IdempotencyGate::with_lease(pool.clone(), idempotency_lease),
            ledger: LedgerRepository::new(pool.clone()),
            dedup: DedupRepository::new(pool),
        }
    }
}

/// Full application: `/health` plus the tenant-scoped API under `/api/v1`
pub fn build_app(state: AppState) -> Router {
    // Layers run outermost-last: logging -> tenant -> idempotency -> handler
    let api_routes = create_router()
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::idempotency_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::tenant_middleware))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
