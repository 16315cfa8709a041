use crate::api::ApiServer;
use crate::audio::{self, SessionDirectory};
use crate::capture::CpalCaptureEngine;
use crate::config::{Config, ConfigHandle};
use crate::global;
use crate::instance::InstanceLock;
use crate::monitor::{runner, CallController, Collaborators, ControlFlags, StatusHandle};
use crate::process::SysinfoLocator;
use crate::window::TopLevelWindowInspector;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Controller wired to the real OS collaborators. Must be called on the
/// thread that will run it.
pub fn build_controller(config: &Config, status: StatusHandle) -> CallController {
    let sessions = SessionDirectory::new(
        audio::platform_session_backend(),
        config.monitoring.diagnostics_every_cycles,
    );
    CallController::new(
        Collaborators {
            locator: Box::new(SysinfoLocator::new()),
            sessions,
            windows: Box::new(TopLevelWindowInspector::default()),
            capture: Box::new(CpalCaptureEngine::new()),
        },
        status,
        global::current_user_name(),
    )
}

pub async fn run_service(config_path: PathBuf, config: Config) -> Result<()> {
    info!("Starting callwatch service");

    let _lock = InstanceLock::acquire(&global::instance_lock_file()?)?;

    if !cfg!(windows) {
        warn!("Per-process audio sessions are only available on Windows; no call will start automatically");
    }

    let handle = ConfigHandle::new(config.clone(), config_path);
    let status = StatusHandle::default();
    let flags = ControlFlags::default();

    let controller_config = handle.clone();
    let controller_status = status.clone();
    let monitor = runner::spawn(
        move || {
            let snapshot = controller_config.snapshot();
            build_controller(&snapshot, controller_status)
        },
        handle.clone(),
        flags.clone(),
    )
    .context("Failed to spawn call monitor thread")?;

    info!(
        "Watching {} for calls, recordings go to {:?}",
        config.processes.targets.join(", "),
        config.recording.recordings_dir()
    );

    if config.api.enabled {
        let server = ApiServer::new(config.api.port, status.clone(), flags.clone(), handle.clone());
        let api_flags = flags.clone();
        let shutdown = async move {
            wait_for_ctrl_c().await;
            api_flags.request_shutdown();
        };
        if let Err(e) = server.start(shutdown).await {
            error!("API server failed: {:#}", e);
            wait_for_ctrl_c().await;
        }
    } else {
        info!("Control API disabled");
        wait_for_ctrl_c().await;
    }

    info!("Shutting down, closing recordings");
    flags.request_shutdown();
    tokio::task::spawn_blocking(move || monitor.join())
        .await
        .context("Failed to wait for call monitor")?
        .map_err(|_| anyhow::anyhow!("Call monitor thread panicked"))?;

    info!("callwatch stopped");
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
