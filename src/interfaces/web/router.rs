use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware,
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use super::AppState;
use crate::core::error::EngineError;

/// Header carrying the provider's HMAC-SHA256 body signature.
const SIGNATURE_HEADER: &str = "x-recorder-signature";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/recorder", post(webhook_endpoint))
        .route("/api/sync/status", post(trigger_status_sync))
        .route("/api/sync/calendar/{user_id}", post(trigger_calendar_sync))
        .route("/api/schedule/auto/{user_id}", post(trigger_auto_schedule))
        .route("/api/scheduler/status", get(scheduler_status))
        .layer(middleware::from_fn(security_headers))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Client errors (bad signature, malformed payload) come back as 400 so the
/// provider stops redelivering; exhausted transient errors as 503 so it tries
/// again later.
async fn webhook_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.engine.process_webhook(&body, signature).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "success": result.success,
                "message": result.message,
                "processed": result.processed,
            })),
        ),
        Err(EngineError::Client(msg)) => {
            warn!("Rejected webhook delivery: {msg}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": msg})),
            )
        }
        Err(EngineError::Transient(msg)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "error": msg})),
        ),
    }
}

async fn trigger_status_sync(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.trigger_status_sync().await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({"success": true, "report": report})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": e.to_string()})),
        ),
    }
}

async fn trigger_calendar_sync(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.trigger_calendar_sync(Some(&user_id)).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({"success": true, "report": report})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": e.to_string()})),
        ),
    }
}

async fn trigger_auto_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.trigger_auto_schedule(Some(&user_id)).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({"success": true, "report": report})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": e.to_string()})),
        ),
    }
}

async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.scheduler_status();
    Json(json!({
        "success": true,
        "running": status.running,
        "tasks_active": status.tasks_active,
    }))
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
