//! Health & liveness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /health   -> healthy when a backend session is active (503 otherwise)

use crate::{models::backend_config::BackendMode, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(Liveness { status: "ok" }))
}

/// `GET /health`
///
/// Reports the active backend without contacting it; reachability is what
/// `POST /config/backend/probe` is for.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.selector.current().await;

    let (status, body_status) = match session {
        Some(_) => (StatusCode::OK, "healthy"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    let body = HealthResponse {
        status: body_status,
        active_endpoint_descriptor: session
            .as_ref()
            .map(|s| s.descriptor())
            .unwrap_or_default(),
        mode: session.as_ref().map(|s| s.mode()),
        generation: session.as_ref().map(|s| s.generation()),
        timestamp: Utc::now(),
        custom_tags: state.custom_tags.to_vec(),
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    active_endpoint_descriptor: String,
    mode: Option<BackendMode>,
    generation: Option<u64>,
    timestamp: DateTime<Utc>,
    custom_tags: Vec<String>,
}
