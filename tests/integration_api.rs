//! API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use logistics_core::api::{self, routes::AdjustmentRequest, AppState};
use logistics_core::idempotency::DEFAULT_LEASE;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::util::ServiceExt;
use uuid::Uuid;

mod common;
use common::usd;

/// App over a pool that never connects; for paths rejected before storage
fn offline_app() -> Router {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .unwrap();
    api::build_app(AppState::new(pool, DEFAULT_LEASE))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, tenant: &str, key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-Tenant-Id", tenant);
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, tenant: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("X-Tenant-Id", tenant)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_needs_no_tenant() {
    let response = offline_app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_tenant_is_bad_request() {
    let request = Request::builder()
        .uri(format!("/api/v1/orders/{}/net-total", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = offline_app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "missing_header");
}

#[tokio::test]
async fn test_malformed_tenant_is_bad_request() {
    let response = offline_app()
        .oneshot(get(
            &format!("/api/v1/orders/{}/net-total", Uuid::new_v4()),
            "tenant-a",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "invalid_request");
}

#[tokio::test]
async fn test_write_without_idempotency_key_is_bad_request() {
    let tenant = Uuid::new_v4().to_string();
    let body = json!({"line1": "1 Main St", "city": "X", "postal_code": "1", "country": "US"});
    let response = offline_app()
        .oneshot(post("/api/v1/addresses", &tenant, None, &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], "missing_header");
    assert_eq!(json["details"], "Idempotency-Key");
}

#[tokio::test]
async fn test_adjustment_flow_with_replay() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let order_id = common::seed_order(&pool, tenant, usd(1000)).await;
    let app = api::build_app(AppState::new(pool, DEFAULT_LEASE));
    let tenant_header = tenant.to_string();
    let uri = format!("/api/v1/orders/{}/adjustments", order_id);
    let key = common::unique_id("req");

    let body = serde_json::to_value(AdjustmentRequest {
        adjustment_id: common::unique_id("ADJ1"),
        amount: usd(-200),
        reason: "late delivery".to_string(),
        authorized_by: "dispatcher".to_string(),
    })
    .unwrap();

    // 1. First request executes
    let response = app
        .clone()
        .oneshot(post(&uri, &tenant_header, Some(key.as_str()), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("Idempotent-Replayed").is_none());
    let original = body_json(response).await;
    assert_eq!(original["amount"], json!({"amount": "-200", "currency": "USD"}));

    // 2. Retry with the same key replays the stored response
    let response = app
        .clone()
        .oneshot(post(&uri, &tenant_header, Some(key.as_str()), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers().get("Idempotent-Replayed").unwrap(), "true");
    assert_eq!(body_json(response).await, original);

    // 3. Same key, different body
    let mut altered = body.clone();
    altered["reason"] = json!("something else");
    let response = app
        .clone()
        .oneshot(post(&uri, &tenant_header, Some(key.as_str()), &altered))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error_code"], "idempotency_key_reused");

    // 4. New key, same adjustment id: the ledger rejects the duplicate
    let response = app
        .clone()
        .oneshot(post(&uri, &tenant_header, Some(common::unique_id("req").as_str()), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error_code"], "duplicate_adjustment");

    // 5. Net total reflects exactly one adjustment
    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/orders/{}/net-total", order_id), &tenant_header))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["net_total"], json!({"amount": "800", "currency": "USD"}));

    // 6. Listing
    let response = app
        .clone()
        .oneshot(get(&uri, &tenant_header))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["adjustments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let app = api::build_app(AppState::new(pool, DEFAULT_LEASE));
    let tenant = common::new_tenant().to_string();

    let response = app
        .oneshot(get(
            &format!("/api/v1/orders/{}/net-total", Uuid::new_v4()),
            &tenant,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "order_not_found");
}

#[tokio::test]
async fn test_invalid_money_is_bad_request() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let order_id = common::seed_order(&pool, tenant, usd(1000)).await;
    let app = api::build_app(AppState::new(pool, DEFAULT_LEASE));

    let body = json!({
        "adjustment_id": common::unique_id("ADJ"),
        "amount": {"amount": "12.5", "currency": "USD"},
        "reason": "fractional cents",
        "authorized_by": "ops"
    });
    let response = app
        .oneshot(post(
            &format!("/api/v1/orders/{}/adjustments", order_id),
            &tenant.to_string(),
            Some(common::unique_id("req").as_str()),
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_address_resolution_status_codes() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let app = api::build_app(AppState::new(pool, DEFAULT_LEASE));
    let tenant = common::new_tenant().to_string();
    let street = format!("{} Harbour Rd", Uuid::new_v4().simple());
    let body = json!({"line1": street, "city": "Perth", "postal_code": "6000", "country": "AU"});

    let response = app
        .clone()
        .oneshot(post("/api/v1/addresses", &tenant, Some(common::unique_id("a").as_str()), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await;
    assert_eq!(first["created"], true);

    let response = app
        .clone()
        .oneshot(post("/api/v1/addresses", &tenant, Some(common::unique_id("a").as_str()), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["created"], false);
    assert_eq!(second["address_id"], first["address_id"]);
}
