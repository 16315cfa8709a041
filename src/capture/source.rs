//! cpal input streams spooled to disk as mono `f32` WAV.
//!
//! The audio callback only downmixes into a shared buffer. A writer thread
//! per source drains that buffer into the file every few milliseconds, so
//! memory stays bounded for calls of any length.

use super::CaptureError;
use crate::audio::mono_spec;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use hound::WavWriter;
use std::fs::File;
use std::io::BufWriter;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

pub type SampleBuffer = Arc<Mutex<Vec<f32>>>;

const DRAIN_INTERVAL: Duration = Duration::from_millis(50);
/// Drains between header updates, about once a second.
const CHECKPOINT_EVERY: u32 = 20;

/// Where a capture stream reads from.
pub enum SourceDevice {
    /// A regular input device (microphone, line-in, monitor source).
    Input(cpal::Device),
    /// Loopback of an output device. Only WASAPI supports this.
    Loopback(cpal::Device),
}

impl SourceDevice {
    fn device(&self) -> &cpal::Device {
        match self {
            Self::Input(device) | Self::Loopback(device) => device,
        }
    }

    pub fn name(&self) -> String {
        self.device()
            .name()
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn default_config(&self) -> Result<cpal::SupportedStreamConfig, CaptureError> {
        let result = match self {
            Self::Input(device) => device.default_input_config(),
            Self::Loopback(device) => device.default_output_config(),
        };
        result.map_err(|e| CaptureError::Stream(format!("{}: {}", self.name(), e)))
    }
}

/// Audio of whatever the default output is playing. Windows uses WASAPI
/// loopback; PulseAudio/PipeWire expose it as a "monitor" input.
pub fn playback_source(host: &cpal::Host) -> Result<SourceDevice, CaptureError> {
    if cfg!(windows) {
        return host
            .default_output_device()
            .map(SourceDevice::Loopback)
            .ok_or_else(|| CaptureError::NoDevice("default output".to_string()));
    }

    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    for device in devices {
        if let Ok(name) = device.name() {
            if name.to_lowercase().contains("monitor") {
                debug!("Using monitor source {} for playback capture", name);
                return Ok(SourceDevice::Input(device));
            }
        }
    }
    Err(CaptureError::NoDevice("playback monitor source".to_string()))
}

/// Input device by name; an empty name selects the default input.
pub fn input_source(host: &cpal::Host, name: &str) -> Result<SourceDevice, CaptureError> {
    if name.is_empty() {
        return host
            .default_input_device()
            .map(SourceDevice::Input)
            .ok_or_else(|| CaptureError::NoDevice("default input".to_string()));
    }

    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(SourceDevice::Input(device));
        }
    }
    Err(CaptureError::NoDevice(name.to_string()))
}

/// Where a source's samples are spooled.
pub enum SpoolTarget {
    /// Straight into the final recording file.
    Path(PathBuf),
    /// Into a temporary WAV that is removed once it is dropped.
    Temp,
}

/// On-disk WAV holding one source's audio.
#[derive(Debug)]
pub enum SpoolFile {
    Kept(PathBuf),
    Temp(TempPath),
}

impl SpoolFile {
    pub fn path(&self) -> &Path {
        match self {
            Self::Kept(path) => path.as_path(),
            Self::Temp(path) => &**path,
        }
    }

    /// Keep the file on disk, even if it was a temporary one.
    pub fn keep(self) -> PathBuf {
        match self {
            Self::Kept(path) => path,
            Self::Temp(temp) => match temp.keep() {
                Ok(path) => path,
                Err(e) => {
                    warn!("Could not keep spool file: {}", e);
                    e.path.to_path_buf()
                }
            },
        }
    }
}

/// A stopped source and the WAV its audio was spooled into.
#[derive(Debug)]
pub struct SpooledTrack {
    pub file: SpoolFile,
    pub sample_rate: u32,
    pub started_at: Instant,
    pub len: u64,
}

/// Writes drained callback buffers into a WAV file, updating the header at
/// every checkpoint so an interrupted recording stays readable.
pub struct Spooler {
    writer: WavWriter<BufWriter<File>>,
    written: u64,
}

impl Spooler {
    pub fn new(file: File, sample_rate: u32) -> Result<Self, hound::Error> {
        Ok(Self {
            writer: WavWriter::new(BufWriter::new(file), mono_spec(sample_rate))?,
            written: 0,
        })
    }

    /// Move everything queued in `buffer` to the file. Returns the number of
    /// samples written.
    pub fn drain(&mut self, buffer: &SampleBuffer) -> Result<usize, hound::Error> {
        let chunk = take_samples(buffer);
        for &sample in &chunk {
            self.writer.write_sample(sample)?;
        }
        self.written += chunk.len() as u64;
        Ok(chunk.len())
    }

    pub fn checkpoint(&mut self) -> Result<(), hound::Error> {
        self.writer.flush()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn close(self) -> Result<u64, hound::Error> {
        self.writer.finalize()?;
        Ok(self.written)
    }
}

fn take_samples(buffer: &SampleBuffer) -> Vec<f32> {
    match buffer.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

/// Writer thread body: drain until `active` drops, then a final drain.
fn spool_loop(mut spooler: Spooler, buffer: SampleBuffer, active: &AtomicBool) -> Result<u64, hound::Error> {
    let mut drains: u32 = 0;
    loop {
        let running = active.load(Ordering::Acquire);
        spooler.drain(&buffer)?;
        if !running {
            break;
        }
        drains = drains.wrapping_add(1);
        if drains % CHECKPOINT_EVERY == 0 {
            spooler.checkpoint()?;
        }
        thread::sleep(DRAIN_INTERVAL);
    }
    spooler.close()
}

/// A running stream whose samples are continuously spooled to disk.
pub struct LiveSource {
    stream: cpal::Stream,
    active: Arc<AtomicBool>,
    writer: thread::JoinHandle<Result<u64, hound::Error>>,
    file: SpoolFile,
    pub sample_rate: u32,
    pub started_at: Instant,
    pub device_name: String,
}

impl LiveSource {
    pub fn open(source: &SourceDevice, target: SpoolTarget) -> Result<Self, CaptureError> {
        let supported = source.default_config()?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let device_name = source.name();

        let (file, spool_file) = create_spool(target)?;
        let spooler = Spooler::new(file, sample_rate).map_err(|e| CaptureError::Write {
            path: spool_file.path().to_path_buf(),
            reason: e.to_string(),
        })?;

        let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicBool::new(true));
        let stream = build_stream_dispatch(
            source.device(),
            &config,
            sample_format,
            buffer.clone(),
            active.clone(),
        )?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(format!("failed to start stream: {e}")))?;

        let writer_active = active.clone();
        let writer = thread::Builder::new()
            .name("wav-spool".to_string())
            .spawn(move || {
                let result = spool_loop(spooler, buffer, &writer_active);
                if result.is_err() {
                    writer_active.store(false, Ordering::Release);
                }
                result
            })
            .map_err(|e| CaptureError::Stream(format!("failed to spawn writer: {e}")))?;

        info!(
            "Capturing from {} ({}Hz, {} ch) -> {:?}",
            device_name,
            sample_rate,
            config.channels,
            spool_file.path()
        );

        Ok(Self {
            stream,
            active,
            writer,
            file: spool_file,
            sample_rate,
            started_at: Instant::now(),
            device_name,
        })
    }

    /// Stop the stream, flush the rest of its audio and close the file.
    pub fn finish(self) -> Result<SpooledTrack, CaptureError> {
        let Self {
            stream,
            active,
            writer,
            file,
            sample_rate,
            started_at,
            device_name,
        } = self;

        if let Err(e) = stream.pause() {
            debug!("Pausing {} failed: {}", device_name, e);
        }
        drop(stream);
        active.store(false, Ordering::Release);

        let write_error = |reason: String| CaptureError::Write {
            path: file.path().to_path_buf(),
            reason,
        };
        let len = match writer.join() {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => return Err(write_error(e.to_string())),
            Err(_) => return Err(write_error("writer thread panicked".to_string())),
        };
        debug!("{} stopped, {} samples spooled", device_name, len);

        Ok(SpooledTrack {
            file,
            sample_rate,
            started_at,
            len,
        })
    }
}

fn create_spool(target: SpoolTarget) -> Result<(File, SpoolFile), CaptureError> {
    match target {
        SpoolTarget::Path(path) => match File::create(&path) {
            Ok(file) => Ok((file, SpoolFile::Kept(path))),
            Err(e) => Err(CaptureError::Write {
                path,
                reason: e.to_string(),
            }),
        },
        SpoolTarget::Temp => {
            let named = tempfile::Builder::new()
                .prefix("callwatch-")
                .suffix(".wav")
                .tempfile()
                .map_err(|e| CaptureError::Write {
                    path: std::env::temp_dir(),
                    reason: e.to_string(),
                })?;
            let (file, path) = named.into_parts();
            Ok((file, SpoolFile::Temp(path)))
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: SampleBuffer,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::Relaxed) {
                    return;
                }
                let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    let Ok(mut samples) = buffer.lock() else {
                        return;
                    };
                    for frame in data.chunks(channels) {
                        let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                        samples.push(sum / frame.len() as f32);
                    }
                }));
                if result.is_err() {
                    warn!("Capture callback panicked, dropping buffer");
                }
            },
            |err| error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| CaptureError::Stream(format!("failed to build stream: {e}")))
}

fn build_stream_dispatch(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    buffer: SampleBuffer,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError> {
    match sample_format {
        SampleFormat::F32 => build_stream::<f32>(device, config, buffer, active),
        SampleFormat::I16 => build_stream::<i16>(device, config, buffer, active),
        SampleFormat::U16 => build_stream::<u16>(device, config, buffer, active),
        SampleFormat::I32 => build_stream::<i32>(device, config, buffer, active),
        SampleFormat::U8 => build_stream::<u8>(device, config, buffer, active),
        fmt => Err(CaptureError::Stream(format!(
            "unsupported sample format {fmt:?}"
        ))),
    }
}
