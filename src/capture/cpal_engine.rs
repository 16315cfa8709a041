//! Capture engine on top of cpal.
//!
//! Every source spools its mono samples to disk while it runs. A direct
//! source without a microphone companion spools straight into its recording
//! file; everything else spools to temporary WAVs that are mixed into the
//! recording once the sources stop. Monitor-only sources belong to the
//! shared mixed output, which is written when it is disabled.

use super::source::{
    input_source, playback_source, LiveSource, SourceDevice, SpoolTarget, SpooledTrack,
};
use super::{CaptureEngine, CaptureError, DeviceCapture, MicDevice, ProcessCapture};
use crate::audio::{AudioMixer, Track};
use crate::config::AudioFormat;
use cpal::traits::{DeviceTrait, HostTrait};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FALLBACK_SAMPLE_RATE: u32 = 48_000;

enum Sink {
    Direct {
        path: PathBuf,
        companion: Option<LiveSource>,
    },
    Monitor,
}

struct RunningCapture {
    source: LiveSource,
    sink: Sink,
}

struct MixedOutput {
    path: PathBuf,
    enabled_at: Instant,
    tracks: Vec<(SpooledTrack, Duration)>,
}

impl MixedOutput {
    fn add(&mut self, track: SpooledTrack) {
        let offset = track.started_at.saturating_duration_since(self.enabled_at);
        self.tracks.push((track, offset));
    }
}

pub struct CpalCaptureEngine {
    host: cpal::Host,
    captures: HashMap<u32, RunningCapture>,
    mixed: Option<MixedOutput>,
}

impl CpalCaptureEngine {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            captures: HashMap::new(),
            mixed: None,
        }
    }

    fn check_format(format: AudioFormat) -> Result<(), CaptureError> {
        match format {
            AudioFormat::Wav => Ok(()),
            other => Err(CaptureError::UnsupportedFormat(other)),
        }
    }

    fn check_free(&self, id: u32) -> Result<(), CaptureError> {
        if self.captures.contains_key(&id) {
            return Err(CaptureError::AlreadyRunning(id));
        }
        Ok(())
    }

    fn output_loopback(&self, name: &str) -> Result<SourceDevice, CaptureError> {
        if !cfg!(windows) {
            return Err(CaptureError::NoDevice(format!("loopback of {name}")));
        }
        let devices = self
            .host
            .output_devices()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(SourceDevice::Loopback(device));
            }
        }
        Err(CaptureError::NoDevice(name.to_string()))
    }

    fn finish_capture(&mut self, id: u32, capture: RunningCapture) {
        let RunningCapture { source, sink } = capture;
        let track = match source.finish() {
            Ok(track) => track,
            Err(e) => {
                warn!("Capture {}: {}", id, e);
                return;
            }
        };

        match sink {
            Sink::Direct {
                companion: None,
                path,
            } => info!("Recording saved: {:?} ({} samples)", path, track.len),
            Sink::Direct {
                companion: Some(mic),
                path,
            } => {
                let mut spools = vec![(track, Duration::ZERO)];
                match mic.finish() {
                    Ok(mic_track) => spools.push((mic_track, Duration::ZERO)),
                    Err(e) => warn!("Capture {} microphone: {}", id, e),
                }
                if let Err(e) = write_mix(&path, spools) {
                    warn!("Capture {}: {}", id, e);
                }
            }
            Sink::Monitor => match &mut self.mixed {
                Some(mixed) => mixed.add(track),
                None => debug!(
                    "Capture {} stopped with no mixed output, dropping {} samples",
                    id, track.len
                ),
            },
        }
    }
}

/// Mix finished sources into `output`. If that fails the spooled audio is
/// kept on disk so the call is not lost.
fn write_mix(output: &Path, spools: Vec<(SpooledTrack, Duration)>) -> Result<u64, CaptureError> {
    let tracks: Vec<Track> = spools
        .iter()
        .map(|(spool, offset)| Track {
            path: spool.file.path().to_path_buf(),
            sample_rate: spool.sample_rate,
            len: spool.len,
            offset: *offset,
        })
        .collect();

    match AudioMixer::mix_to_file(&tracks, output, FALLBACK_SAMPLE_RATE) {
        Ok(samples) => {
            info!(
                "Recording saved: {:?} ({} samples, {} tracks)",
                output,
                samples,
                tracks.len()
            );
            Ok(samples)
        }
        Err(e) => {
            for (spool, _) in spools {
                let kept = spool.file.keep();
                warn!("Unmixed audio kept at {:?}", kept);
            }
            Err(CaptureError::Write {
                path: output.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

impl Default for CpalCaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureEngine for CpalCaptureEngine {
    fn default_microphone(&mut self) -> Option<MicDevice> {
        let device = self.host.default_input_device()?;
        let name = device.name().ok()?;
        Some(MicDevice {
            id: name.clone(),
            friendly_name: name,
        })
    }

    fn start_capture(&mut self, request: &ProcessCapture) -> Result<(), CaptureError> {
        self.check_free(request.subject_id)?;
        Self::check_format(request.format)?;

        let device = if request.is_process_source {
            playback_source(&self.host)?
        } else {
            input_source(&self.host, &request.source_name)?
        };

        let (source, sink) = if request.monitor_only {
            (LiveSource::open(&device, SpoolTarget::Temp)?, Sink::Monitor)
        } else {
            let companion = match &request.mic_device_id {
                Some(mic_id) => match input_source(&self.host, mic_id)
                    .and_then(|d| LiveSource::open(&d, SpoolTarget::Temp))
                {
                    Ok(mic) => Some(mic),
                    Err(e) => {
                        warn!("Capture {}: microphone unavailable: {}", request.subject_id, e);
                        None
                    }
                },
                None => None,
            };
            let target = if companion.is_some() {
                SpoolTarget::Temp
            } else {
                SpoolTarget::Path(request.output_path.clone())
            };
            let source = LiveSource::open(&device, target)?;
            let sink = Sink::Direct {
                path: request.output_path.clone(),
                companion,
            };
            (source, sink)
        };

        info!(
            "Capture {} started for {} ({})",
            request.subject_id,
            request.source_name,
            if request.monitor_only { "monitor" } else { "direct" }
        );
        self.captures
            .insert(request.subject_id, RunningCapture { source, sink });
        Ok(())
    }

    fn start_capture_from_device(&mut self, request: &DeviceCapture) -> Result<(), CaptureError> {
        self.check_free(request.id)?;
        Self::check_format(request.format)?;

        let device = if request.is_input {
            input_source(&self.host, &request.device_name)?
        } else {
            self.output_loopback(&request.device_name)?
        };
        let (target, sink) = if request.monitor_only {
            (SpoolTarget::Temp, Sink::Monitor)
        } else {
            (
                SpoolTarget::Path(request.output_path.clone()),
                Sink::Direct {
                    path: request.output_path.clone(),
                    companion: None,
                },
            )
        };
        let source = LiveSource::open(&device, target)?;

        info!(
            "Capture {:#x} started on device {}",
            request.id, request.device_name
        );
        self.captures.insert(request.id, RunningCapture { source, sink });
        Ok(())
    }

    fn enable_mixed_recording(
        &mut self,
        output_path: &Path,
        format: AudioFormat,
        _bitrate: u32,
    ) -> Result<(), CaptureError> {
        Self::check_format(format)?;
        if let Some(mixed) = &self.mixed {
            debug!("Mixed output already enabled ({:?})", mixed.path);
            return Ok(());
        }
        self.mixed = Some(MixedOutput {
            path: output_path.to_path_buf(),
            enabled_at: Instant::now(),
            tracks: Vec::new(),
        });
        info!("Mixed output enabled: {:?}", output_path);
        Ok(())
    }

    fn disable_mixed_recording(&mut self) {
        if self.mixed.is_none() {
            return;
        }

        let monitors: Vec<u32> = self
            .captures
            .iter()
            .filter(|(_, capture)| matches!(capture.sink, Sink::Monitor))
            .map(|(id, _)| *id)
            .collect();
        for id in monitors {
            if let Some(capture) = self.captures.remove(&id) {
                self.finish_capture(id, capture);
            }
        }

        let Some(mixed) = self.mixed.take() else {
            return;
        };
        if let Err(e) = write_mix(&mixed.path, mixed.tracks) {
            warn!("Mixed output: {}", e);
        }
    }

    fn stop_capture(&mut self, id: u32) {
        match self.captures.remove(&id) {
            Some(capture) => self.finish_capture(id, capture),
            None => debug!("Capture {} not running", id),
        }
    }

    fn stop_all_captures(&mut self) {
        let ids: Vec<u32> = self.captures.keys().copied().collect();
        for id in ids {
            self.stop_capture(id);
        }
        self.disable_mixed_recording();
    }
}

impl Drop for CpalCaptureEngine {
    fn drop(&mut self) {
        if !self.captures.is_empty() || self.mixed.is_some() {
            debug!("Dropping capture engine with live sources, flushing");
            self.stop_all_captures();
        }
    }
}
