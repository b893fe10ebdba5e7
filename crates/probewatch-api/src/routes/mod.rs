use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use probewatch_core::{
    EndpointDefinition, ProbeReport, ProbeStatus, Registry, SchedulerStats, UrlHealthSnapshot,
};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SweepResponse {
    pub started_at: String,
    pub finished_at: String,
    pub token_refreshed: bool,
    pub up: usize,
    pub failed: usize,
    pub down: usize,
    pub alerts: usize,
    pub entries: Vec<ProbeReport>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub state: String,
    pub created_at: String,
    pub last_sweep: Option<String>,
    pub sweeping: bool,
    pub sweep_interval_ms: u64,
    pub down_threshold_ms: u64,
    pub stats: SchedulerStats,
    pub endpoints: Vec<UrlHealthSnapshot>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/endpoints", get(list_endpoints))
        .route("/probe", post(ad_hoc_probe))
        .route("/sweep", post(trigger_sweep))
        .route("/status", get(get_status))
}

/// GET /api/v1/endpoints
async fn list_endpoints(State(state): State<AppState>) -> Json<Registry> {
    Json(state.scheduler.registry().await)
}

/// POST /api/v1/probe
///
/// Mirrors the upstream status and body on success; any probe failure is a 500.
async fn ad_hoc_probe(
    State(state): State<AppState>,
    Json(definition): Json<EndpointDefinition>,
) -> Result<Response, ApiError> {
    definition.validate()?;

    let ProbeReport { outcome, .. } = state.scheduler.run_ad_hoc_probe(&definition).await;

    match (outcome.status, outcome.response) {
        (ProbeStatus::Success, Some(response)) => {
            let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
            Ok((status, response.body).into_response())
        }
        (ProbeStatus::Success, None) => Ok(StatusCode::OK.into_response()),
        (ProbeStatus::Failure(reason), _) => Err(ApiError::Internal(reason)),
    }
}

/// POST /api/v1/sweep
async fn trigger_sweep(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.scheduler.run_sweep().await?;

    Ok(Json(SweepResponse {
        started_at: report.started_at.to_rfc3339(),
        finished_at: report.finished_at.to_rfc3339(),
        token_refreshed: report.token_refreshed,
        up: report.succeeded(),
        failed: report.failed(),
        down: report.down(),
        alerts: report.alerts(),
        entries: report.entries,
    }))
}

/// GET /api/v1/status
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let scheduler = &state.scheduler;
    let config = scheduler.config();

    Json(StatusResponse {
        state: scheduler.state().await.to_string(),
        created_at: scheduler.created_at().to_rfc3339(),
        last_sweep: scheduler.last_sweep().await.map(|t| t.to_rfc3339()),
        sweeping: scheduler.is_sweeping(),
        sweep_interval_ms: config.sweep_interval.as_millis() as u64,
        down_threshold_ms: config.down_threshold.as_millis() as u64,
        stats: scheduler.stats(),
        endpoints: scheduler.tracker().snapshot(Utc::now()),
    })
}
