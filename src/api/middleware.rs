//! API Middleware
//!
//! Tenant resolution, request idempotency and request logging.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::domain::{TenantContext, TenantId};
use crate::error::AppError;
use crate::idempotency::{GateOutcome, IdempotencyRepository, StoredResponse};

use super::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// Largest request or response body buffered for idempotency
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Principal placed in request extensions by an upstream authentication
/// layer. `tenant_id` is the raw claim value.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub subject: String,
    pub tenant_id: Option<String>,
}

// =========================================================================
// Tenant resolution
// =========================================================================

fn parse_tenant(source: &str, raw: &str) -> Result<TenantId, AppError> {
    raw.trim()
        .parse::<Uuid>()
        .map(TenantId::new)
        .map_err(|_| AppError::InvalidRequest(format!("{} is not a valid tenant id", source)))
}

/// Resolve the tenant from the `X-Tenant-Id` header and/or the principal's
/// claim. Malformed values and conflicting values are client errors.
pub fn resolve_tenant(headers: &HeaderMap, claim: Option<&str>) -> Result<TenantId, AppError> {
    let mut resolved: Option<TenantId> = None;

    for value in headers.get_all(TENANT_HEADER) {
        let raw = value
            .to_str()
            .map_err(|_| AppError::InvalidRequest("X-Tenant-Id is not valid ASCII".into()))?;
        let tenant = parse_tenant("X-Tenant-Id", raw)?;
        match resolved {
            Some(existing) if existing != tenant => {
                return Err(AppError::InvalidRequest(
                    "conflicting X-Tenant-Id values".into(),
                ));
            }
            _ => resolved = Some(tenant),
        }
    }

    if let Some(raw) = claim {
        let tenant = parse_tenant("tenant claim", raw)?;
        match resolved {
            Some(existing) if existing != tenant => {
                return Err(AppError::InvalidRequest(
                    "X-Tenant-Id does not match the authenticated tenant".into(),
                ));
            }
            _ => resolved = Some(tenant),
        }
    }

    resolved.ok_or_else(|| AppError::MissingHeader("X-Tenant-Id".into()))
}

/// Bind the request's tenant for everything downstream
pub async fn tenant_middleware(request: Request<Body>, next: Next) -> Result<Response, Response> {
    let claim = request
        .extensions()
        .get::<AuthenticatedPrincipal>()
        .and_then(|principal| principal.tenant_id.clone());

    let tenant = resolve_tenant(request.headers(), claim.as_deref())
        .map_err(IntoResponse::into_response)?;

    Ok(TenantContext::scope(tenant, next.run(request)).await)
}

// =========================================================================
// Idempotency
// =========================================================================

/// POST, PUT, PATCH and DELETE carry side effects
pub fn requires_idempotency_key(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn replay_response(stored: StoredResponse) -> Response {
    let status = axum::http::StatusCode::from_u16(stored.status)
        .unwrap_or(axum::http::StatusCode::OK);
    let mut response = if stored.body.is_null() {
        status.into_response()
    } else {
        (status, Json(stored.body)).into_response()
    };
    response
        .headers_mut()
        .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    response
}

fn body_for_storage(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Run non-safe requests at most once per `(tenant, Idempotency-Key)`.
///
/// Must run inside [`tenant_middleware`]. 2xx responses are stored for
/// replay; anything else marks the key FAILED so a retry can take over.
pub async fn idempotency_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let method = request.method().clone();
    if !requires_idempotency_key(&method) {
        return Ok(next.run(request).await);
    }

    let key = match request.headers().get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| {
                AppError::InvalidRequest("Idempotency-Key is not valid ASCII".into())
                    .into_response()
            })?
            .to_string(),
        None => {
            return Err(AppError::MissingHeader("Idempotency-Key".into()).into_response());
        }
    };

    let path = request.uri().path().to_string();
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        AppError::InvalidRequest(format!("failed to read request body: {}", e)).into_response()
    })?;
    let request_hash = IdempotencyRepository::compute_request_hash(method.as_str(), &path, &bytes);
    let request = Request::from_parts(parts, Body::from(bytes));

    let lease = match state
        .gate
        .begin(&key, Some(request_hash.as_str()))
        .await
        .map_err(|e| AppError::from(e).into_response())?
    {
        GateOutcome::Replay(stored) => return Ok(replay_response(stored)),
        GateOutcome::Proceed(lease) => lease,
    };

    let response = next.run(request).await;
    let (parts, body) = response.into_parts();

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(mark_err) = state.gate.fail(&key, &lease).await {
                tracing::error!(idempotency_key = %key, error = %mark_err, "Failed to mark key failed");
            }
            return Err(AppError::Internal(format!("failed to buffer response: {}", e)).into_response());
        }
    };

    if parts.status.is_success() {
        let stored = StoredResponse {
            status: parts.status.as_u16(),
            body: body_for_storage(&bytes),
        };
        if let Err(e) = state.gate.complete(&key, &lease, &stored).await {
            tracing::error!(
                idempotency_key = %key,
                error = %e,
                "Failed to record completed response"
            );
        }
    } else if let Err(e) = state.gate.fail(&key, &lease).await {
        tracing::error!(
            idempotency_key = %key,
            error = %e,
            "Failed to mark idempotency key as failed"
        );
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

// =========================================================================
// Logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let masked_value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        replayed = response.headers().contains_key(REPLAYED_HEADER),
        "Request completed"
    );

    response
}
