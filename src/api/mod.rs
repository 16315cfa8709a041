//! Local control API.
//!
//! Bound to 127.0.0.1 only. Exposes the recordings snapshot, force
//! start/stop requests and configuration reload.

pub mod error;
pub mod routes;

use crate::config::ConfigHandle;
use crate::monitor::{ControlFlags, StatusHandle};
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::future::Future;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::config::ConfigState;
pub use routes::recording::RecordingState;

pub struct ApiServer {
    port: u16,
    recording_state: RecordingState,
    config_state: ConfigState,
}

impl ApiServer {
    pub fn new(port: u16, status: StatusHandle, flags: ControlFlags, config: ConfigHandle) -> Self {
        Self {
            port,
            recording_state: RecordingState { status, flags },
            config_state: ConfigState { config },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(service_info))
            .route("/version", get(version))
            .merge(routes::recording::router(self.recording_state.clone()))
            .merge(routes::config::router(self.config_state.clone()))
            .layer(ServiceBuilder::new())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.port))
            .await
            .with_context(|| format!("Failed to bind 127.0.0.1:{}", self.port))?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                 - Service info");
        info!("  GET  /status           - Current recordings");
        info!("  POST /recording/start  - Force start");
        info!("  POST /recording/stop   - Force stop");
        info!("  GET  /config           - Configuration in effect");
        info!("  POST /config/reload    - Re-read configuration");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("API server failed")?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "callwatch",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "callwatch"
    }))
}
