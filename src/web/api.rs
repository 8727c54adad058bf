//! Routes and handlers for operator recovery actions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use crate::jobs::JobRegistry;
use crate::recovery::RecoveryError;
use crate::temperature_hold::TemperatureHold;
use crate::watchdog::{Supervisor, WatchdogError};
use crate::web::models::{CommandBody, HoldRequest, HoldResponse, PreheatResponse, ReplayRequest};

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn ok() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "result": "ok" }))).into_response()
}

fn watchdog_error(err: WatchdogError) -> axum::response::Response {
    let status = match &err {
        WatchdogError::InvalidState(_) => StatusCode::BAD_REQUEST,
        WatchdogError::MarkerUnknown | WatchdogError::NoActiveJob => StatusCode::CONFLICT,
        WatchdogError::Recovery(RecoveryError::ReplayInProgress) => StatusCode::CONFLICT,
        WatchdogError::Recovery(RecoveryError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        WatchdogError::Recovery(_) => StatusCode::NOT_FOUND,
        WatchdogError::Collaborator(_) => StatusCode::BAD_GATEWAY,
    };
    json_error(&err.to_string(), status)
}

pub struct AppStateInner {
    pub supervisor: Arc<Supervisor>,
    pub jobs: JobRegistry,
    pub hold: TemperatureHold,
    pub hold_tolerance: f64,
}
pub type AppState = Arc<AppStateInner>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/watchdog", get(get_watchdog))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/continue", post(continue_handler))
        .route("/api/v1/recovery/last", get(get_last_command))
        .route("/api/v1/recovery/next", put(set_next_command))
        .route("/api/v1/recovery/resume", post(resume_from_position))
        .route("/api/v1/recovery/replay", get(get_replay).post(replay_handler))
        .route("/api/v1/preheat", post(preheat_handler))
        .route(
            "/api/v1/temperature-hold",
            get(get_hold).post(start_hold).delete(stop_hold),
        )
        .with_state(state)
}

/// GET /api/v1/watchdog
async fn get_watchdog(State(state): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(state.supervisor.snapshot().await)).into_response()
}

/// GET /api/v1/jobs -- oldest first
async fn list_jobs(State(state): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(state.jobs.all().await)).into_response()
}

/// POST /api/v1/continue
async fn continue_handler(State(state): State<AppState>) -> axum::response::Response {
    match state.supervisor.continue_print().await {
        Ok(()) => ok(),
        Err(e) => watchdog_error(e),
    }
}

/// GET /api/v1/recovery/last
async fn get_last_command(State(state): State<AppState>) -> axum::response::Response {
    let command = state.supervisor.last_legal_command().await;
    (StatusCode::OK, Json(CommandBody { command })).into_response()
}

/// PUT /api/v1/recovery/next
async fn set_next_command(
    State(state): State<AppState>,
    Json(payload): Json<CommandBody>,
) -> axum::response::Response {
    if payload.command.trim().is_empty() {
        return json_error("command must not be empty", StatusCode::BAD_REQUEST);
    }
    match state.supervisor.set_next_legal_command(&payload.command).await {
        Ok(()) => ok(),
        Err(e) => watchdog_error(e),
    }
}

/// POST /api/v1/recovery/resume
async fn resume_from_position(State(state): State<AppState>) -> axum::response::Response {
    match state.supervisor.resume_from_position_pause().await {
        Ok(()) => ok(),
        Err(e) => watchdog_error(e),
    }
}

/// POST /api/v1/recovery/replay -- answers as soon as the replay is running
async fn replay_handler(
    State(state): State<AppState>,
    Json(payload): Json<ReplayRequest>,
) -> axum::response::Response {
    match state.supervisor.start_replay(&payload.marker).await {
        Ok(progress) => (StatusCode::ACCEPTED, Json(progress)).into_response(),
        Err(e) => watchdog_error(e),
    }
}

/// GET /api/v1/recovery/replay
async fn get_replay(State(state): State<AppState>) -> axum::response::Response {
    match state.supervisor.replay_status() {
        Some(progress) => (StatusCode::OK, Json(progress)).into_response(),
        None => json_error("no replay has run", StatusCode::NOT_FOUND),
    }
}

/// POST /api/v1/preheat
async fn preheat_handler(State(state): State<AppState>) -> axum::response::Response {
    match state.supervisor.preheat().await {
        Ok(target) => (StatusCode::OK, Json(PreheatResponse { target })).into_response(),
        Err(e) => watchdog_error(e),
    }
}

fn hold_status(hold: &TemperatureHold) -> HoldResponse {
    let setpoint = hold.setpoint();
    HoldResponse {
        running: setpoint.is_some(),
        target: setpoint.map(|s| s.target),
        tolerance: setpoint.map(|s| s.tolerance),
    }
}

/// GET /api/v1/temperature-hold
async fn get_hold(State(state): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(hold_status(&state.hold))).into_response()
}

/// POST /api/v1/temperature-hold
async fn start_hold(
    State(state): State<AppState>,
    Json(payload): Json<HoldRequest>,
) -> axum::response::Response {
    let tolerance = payload.tolerance.unwrap_or(state.hold_tolerance);
    if !(payload.target > 0.0) || !(tolerance >= 0.0) {
        return json_error("target must be positive and tolerance non-negative", StatusCode::BAD_REQUEST);
    }
    state.hold.start(payload.target, tolerance);
    (StatusCode::OK, Json(hold_status(&state.hold))).into_response()
}

/// DELETE /api/v1/temperature-hold
async fn stop_hold(State(state): State<AppState>) -> axum::response::Response {
    if !state.hold.stop() {
        return json_error("no temperature hold running", StatusCode::NOT_FOUND);
    }
    ok()
}
