use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

const MIN_BITRATE: u32 = 32_000;
const MAX_BITRATE: u32 = 320_000;
const DEFAULT_BITRATE: u32 = 128_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub monitoring: MonitoringConfig,
    pub processes: ProcessesConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

/// Output encoding requested from the capture engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
    Opus,
    Flac,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Flac => "flac",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root directory for recordings. Empty means `~/CallRecordings`.
    pub path: String,
    pub format: AudioFormat,
    pub bitrate: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            format: AudioFormat::Wav,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

impl RecordingConfig {
    pub fn recordings_dir(&self) -> PathBuf {
        if self.path.trim().is_empty() {
            global::default_recordings_dir()
        } else {
            PathBuf::from(&self.path)
        }
    }
}

/// A client whose audio session outlives its calls; call boundaries come
/// from its window titles instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSignalClient {
    /// Case-insensitive substring of the executable name.
    pub process_name_contains: String,
    /// Title prefix of the client's main window. Any other visible window
    /// is taken as a call panel.
    pub main_title_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub poll_interval_seconds: u64,
    /// Consecutive qualifying cycles before a recording starts.
    pub start_threshold: u32,
    /// Quiet-but-active cycles before the loudness fallback stops a recording.
    pub silence_threshold: u32,
    /// Inactive-session cycles before a generic recording stops.
    pub inactive_confirm_cycles: u32,
    pub min_recording_seconds: u64,
    pub peak_history_size: usize,
    /// Call-ended cycles before a window-signal recording stops.
    pub client_silence_cycles: u32,
    /// Quiet rolling-average cycles before a window-signal recording stops.
    pub average_silence_cycles: u32,
    /// Rolling-average peak below which a window-signal client counts as quiet.
    pub silence_peak_threshold: f32,
    /// Dump the audio session directory every N cycles (0 disables).
    pub diagnostics_every_cycles: u32,
    pub window_signal_clients: Vec<WindowSignalClient>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 2,
            start_threshold: 2,
            silence_threshold: 15,
            inactive_confirm_cycles: 3,
            min_recording_seconds: 60,
            peak_history_size: 5,
            client_silence_cycles: 3,
            average_silence_cycles: 5,
            silence_peak_threshold: 0.03,
            diagnostics_every_cycles: 15,
            window_signal_clients: vec![WindowSignalClient {
                process_name_contains: "telegram".to_string(),
                main_title_prefix: "Telegram".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessesConfig {
    pub targets: Vec<String>,
}

impl Default for ProcessesConfig {
    fn default() -> Self {
        Self {
            targets: ["WhatsApp.exe", "WhatsApp.Root.exe", "Telegram.exe", "Viber.exe"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Also write the log to a file.
    pub to_file: bool,
    /// Log file location; empty means `<data_dir>/callwatch/logs/callwatch.log`.
    pub file: String,
    /// Size at which the log file is rotated to `<file>.old`.
    pub max_size_mb: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_file: true,
            file: String::new(),
            max_size_mb: 10,
        }
    }
}

impl LoggingConfig {
    /// Where the log file goes, `None` when file logging is off.
    pub fn file_path(&self) -> Result<Option<PathBuf>> {
        if !self.to_file {
            return Ok(None);
        }
        match self.file.trim() {
            "" => Ok(Some(global::log_file()?)),
            path => Ok(Some(PathBuf::from(path))),
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.clamp(1, 1000) * 1024 * 1024
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3747,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let mut config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate();

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    /// Clamp every numeric setting into its supported range and tidy the
    /// free-form fields. Never fails.
    pub fn validate(&mut self) {
        let m = &mut self.monitoring;
        m.poll_interval_seconds = m.poll_interval_seconds.clamp(1, 60);
        m.start_threshold = m.start_threshold.clamp(1, 100);
        m.silence_threshold = m.silence_threshold.clamp(1, 100);
        m.inactive_confirm_cycles = m.inactive_confirm_cycles.clamp(1, 100);
        m.min_recording_seconds = m.min_recording_seconds.min(600);
        m.peak_history_size = m.peak_history_size.clamp(1, 50);
        m.client_silence_cycles = m.client_silence_cycles.clamp(1, 100);
        m.average_silence_cycles = m.average_silence_cycles.clamp(1, 100);
        m.silence_peak_threshold = if m.silence_peak_threshold.is_finite() {
            m.silence_peak_threshold.clamp(0.001, 1.0)
        } else {
            0.03
        };
        m.window_signal_clients
            .retain(|c| !c.process_name_contains.trim().is_empty());

        if !(MIN_BITRATE..=MAX_BITRATE).contains(&self.recording.bitrate) {
            debug!(
                "Bitrate {} out of range, using {}",
                self.recording.bitrate, DEFAULT_BITRATE
            );
            self.recording.bitrate = DEFAULT_BITRATE;
        }
        self.recording.path = sanitize_recording_path(&self.recording.path);
        self.logging.max_size_mb = self.logging.max_size_mb.clamp(1, 1000);

        self.processes.targets = self
            .processes
            .targets
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
}

/// Windows rejects directory names ending in spaces or dots; strip them from
/// every segment.
fn sanitize_recording_path(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let mut sanitized = PathBuf::new();
    for part in Path::new(raw).components() {
        let segment = part.as_os_str().to_string_lossy();
        let trimmed = segment.trim_end_matches([' ', '.']);
        if trimmed.is_empty() && segment != "." && segment != ".." {
            continue;
        }
        if segment == "." || segment == ".." {
            sanitized.push(&*segment);
        } else {
            sanitized.push(trimmed);
        }
    }
    sanitized.to_string_lossy().into_owned()
}

/// Shared, swappable configuration. Readers take an owned snapshot so a
/// concurrent reload never shows up half-applied.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
    path: Arc<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: Arc::new(path),
        }
    }

    pub fn snapshot(&self) -> Config {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, config: Config) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = config;
    }

    /// Re-read the backing file and swap it in whole.
    pub fn reload(&self) -> Result<Config> {
        let config = Config::load_from(&self.path)?;
        self.replace(config.clone());
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
