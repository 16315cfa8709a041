use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "callwatch";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

pub fn instance_lock_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("callwatch.lock"))
}

pub fn log_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs").join("callwatch.log"))
}

/// Default root for recordings when the config leaves `recording.path` empty.
pub fn default_recordings_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home.join("CallRecordings");
    }
    if let Some(local) = dirs::data_local_dir() {
        return local.join(APP_DIR).join("Recordings");
    }
    std::env::temp_dir().join("CallRecordings")
}

/// Login or display name of the user running the service.
pub fn current_user_name() -> String {
    ["USERNAME", "USER", "LOGNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}
