//! Capture engine seam.
//!
//! The controller drives recordings exclusively through [`CaptureEngine`].
//! Sources are keyed by id: subject pids for process audio, synthetic ids
//! (see [`crate::naming::MicIdAllocator`]) for microphones.

pub mod cpal_engine;
pub mod source;

pub use cpal_engine::CpalCaptureEngine;

use crate::config::AudioFormat;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No audio device found for {0}")]
    NoDevice(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Output format '{}' is not supported by this engine", .0.extension())]
    UnsupportedFormat(AudioFormat),
    #[error("Capture {0} is already running")]
    AlreadyRunning(u32),
    #[error("Failed to write {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Start request for a subject's audio.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCapture {
    pub subject_id: u32,
    pub source_name: String,
    pub output_path: PathBuf,
    pub format: AudioFormat,
    pub bitrate: u32,
    /// Feed the shared mixed output instead of writing `output_path`.
    pub monitor_only: bool,
    /// Microphone to record alongside a direct capture.
    pub mic_device_id: Option<String>,
    /// `false` means `source_name` names an input device rather than a process.
    pub is_process_source: bool,
}

/// Start request for a specific audio device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapture {
    pub id: u32,
    pub device_name: String,
    pub device_id: String,
    pub is_input: bool,
    pub output_path: PathBuf,
    pub format: AudioFormat,
    pub bitrate: u32,
    pub monitor_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicDevice {
    pub id: String,
    pub friendly_name: String,
}

pub trait CaptureEngine {
    fn default_microphone(&mut self) -> Option<MicDevice>;

    fn start_capture(&mut self, request: &ProcessCapture) -> Result<(), CaptureError>;

    fn start_capture_from_device(&mut self, request: &DeviceCapture) -> Result<(), CaptureError>;

    /// Start combining every monitor-only source into one output file.
    fn enable_mixed_recording(
        &mut self,
        output_path: &std::path::Path,
        format: AudioFormat,
        bitrate: u32,
    ) -> Result<(), CaptureError>;

    /// Finish the mixed output. No-op when it is not enabled.
    fn disable_mixed_recording(&mut self);

    /// Stop one source. Unknown or already stopped ids are ignored.
    fn stop_capture(&mut self, id: u32);

    fn stop_all_captures(&mut self);
}
