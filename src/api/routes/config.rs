//! Configuration inspection and reload.
//!
//! - `GET /config` the configuration currently in effect
//! - `POST /config/reload` re-read the file; the next poll cycle uses it

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigHandle;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tracing::{error, info};

#[derive(Clone)]
pub struct ConfigState {
    pub config: ConfigHandle,
}

pub fn router(state: ConfigState) -> Router {
    Router::new()
        .route("/config", get(current_config))
        .route("/config/reload", post(reload_config))
        .with_state(state)
}

async fn current_config(State(state): State<ConfigState>) -> ApiResult<Json<Value>> {
    let config = state.config.snapshot();
    let value = serde_json::to_value(&config)
        .map_err(|e| ApiError::internal(format!("Failed to serialize config: {}", e)))?;
    Ok(Json(json!({
        "path": state.config.path(),
        "config": value,
    })))
}

async fn reload_config(State(state): State<ConfigState>) -> ApiResult<Json<Value>> {
    let handle = state.config.clone();
    let reloaded = tokio::task::spawn_blocking(move || handle.reload())
        .await
        .map_err(|e| ApiError::internal(format!("Reload task failed: {}", e)))?;

    match reloaded {
        Ok(config) => {
            info!("Configuration reloaded via API");
            Ok(Json(json!({
                "success": true,
                "poll_interval_seconds": config.monitoring.poll_interval_seconds,
                "targets": config.processes.targets,
            })))
        }
        Err(e) => {
            error!("Configuration reload failed: {:#}", e);
            Err(e.into())
        }
    }
}
