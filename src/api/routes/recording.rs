//! Recording status and operator control.
//!
//! - `GET /status` current recordings and the active count
//! - `POST /recording/start` force-start the first idle target
//! - `POST /recording/stop` force-stop every recording

use crate::api::error::{ApiError, ApiResult};
use crate::monitor::{ControlFlags, StatusHandle};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tracing::info;

#[derive(Clone)]
pub struct RecordingState {
    pub status: StatusHandle,
    pub flags: ControlFlags,
}

pub fn router(state: RecordingState) -> Router {
    Router::new()
        .route("/status", get(recording_status))
        .route("/recording/start", post(force_start))
        .route("/recording/stop", post(force_stop))
        .with_state(state)
}

async fn recording_status(State(state): State<RecordingState>) -> Json<Value> {
    let recordings = state.status.recordings();
    let entries: Vec<Value> = recordings
        .iter()
        .map(|r| {
            json!({
                "pid": r.pid,
                "process_name": r.process_name,
                "output_path": r.output_path,
                "started_at": r.started_at.to_rfc3339(),
                "duration_seconds": r.duration_seconds(),
                "mixed_enabled": r.mixed_enabled,
            })
        })
        .collect();

    Json(json!({
        "active_count": state.status.active_count(),
        "recordings": entries,
        "shutting_down": state.flags.shutdown_requested(),
    }))
}

fn ensure_running(flags: &ControlFlags) -> ApiResult<()> {
    if flags.shutdown_requested() {
        return Err(ApiError::unavailable("Call monitor is shutting down"));
    }
    Ok(())
}

async fn force_start(State(state): State<RecordingState>) -> ApiResult<Json<Value>> {
    ensure_running(&state.flags)?;
    info!("Force start requested via API");
    state.flags.request_force_start();
    Ok(Json(json!({
        "success": true,
        "requested": "start",
    })))
}

async fn force_stop(State(state): State<RecordingState>) -> ApiResult<Json<Value>> {
    ensure_running(&state.flags)?;
    info!("Force stop requested via API");
    state.flags.request_force_stop();
    Ok(Json(json!({
        "success": true,
        "requested": "stop",
        "active_count": state.status.active_count(),
    })))
}
