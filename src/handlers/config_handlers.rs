//! Backend configuration handlers.
//!
//! - GET  /config/backend        -> active session and controller phase
//! - PUT  /config/backend        -> swap to a new backend (422 when rejected)
//! - POST /config/backend/probe  -> connectivity check, changes nothing
//!
//! Credentials are accepted but never echoed back.

use crate::{
    models::backend_config::{BackendConfig, BackendMode},
    services::{
        backend::SessionState,
        reconfig_service::{ProbeReport, ReconfigPhase},
    },
    state::AppState,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Candidate backend settings. Same shape for reconfigure and probe.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconfigureRequest {
    pub api_key: Option<String>,
    pub region: Option<String>,
    pub cloud_endpoint: Option<String>,
    pub external_address: Option<String>,
    pub use_tls: bool,
    /// Require the new backend to answer a probe before it goes live.
    pub verify: bool,
}

impl ReconfigureRequest {
    fn config(&self) -> BackendConfig {
        BackendConfig::from_parts(
            self.api_key.clone(),
            self.region.clone(),
            self.cloud_endpoint.clone(),
            self.external_address.clone(),
            self.use_tls,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigureResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generation: Option<u64>,
    pub active_endpoint_descriptor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub active_endpoint_descriptor: Option<String>,
    pub mode: Option<BackendMode>,
    pub generation: Option<u64>,
    pub session_id: Option<Uuid>,
    pub state: Option<SessionState>,
    pub created_at: Option<DateTime<Utc>>,
    pub phase: ReconfigPhase,
}

/// `GET /config/backend`
pub async fn backend_status(State(state): State<AppState>) -> Json<BackendStatus> {
    let session = state.selector.current().await;
    Json(BackendStatus {
        active_endpoint_descriptor: session.as_ref().map(|s| s.descriptor()),
        mode: session.as_ref().map(|s| s.mode()),
        generation: session.as_ref().map(|s| s.generation()),
        session_id: session.as_ref().map(|s| s.id()),
        state: session.as_ref().map(|s| s.state()),
        created_at: session.as_ref().map(|s| s.created_at()),
        phase: state.reconfig.phase(),
    })
}

/// `PUT /config/backend`
pub async fn reconfigure(
    State(state): State<AppState>,
    Json(request): Json<ReconfigureRequest>,
) -> impl IntoResponse {
    match state.reconfig.apply(request.config(), request.verify).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ReconfigureResponse {
                applied: true,
                error: None,
                generation: Some(session.generation()),
                active_endpoint_descriptor: Some(session.descriptor()),
            }),
        ),
        Err(err) => {
            let active = state.selector.current().await;
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ReconfigureResponse {
                    applied: false,
                    error: Some(err.to_string()),
                    generation: active.as_ref().map(|s| s.generation()),
                    active_endpoint_descriptor: active.as_ref().map(|s| s.descriptor()),
                }),
            )
        }
    }
}

/// `POST /config/backend/probe`
pub async fn probe_backend(
    State(state): State<AppState>,
    Json(request): Json<ReconfigureRequest>,
) -> Json<ProbeReport> {
    Json(state.reconfig.probe(&request.config()).await)
}
