//! Combines the spooled tracks of one recording into a single mono WAV.
//!
//! Tracks are read back sample by sample, so mixing an hour-long call needs
//! no more memory than mixing a short one.

use hound::{WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Format of every file the recorder writes: mono, 32-bit float.
pub fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    }
}

/// One source's spooled audio, as handed to the mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub path: PathBuf,
    pub sample_rate: u32,
    /// Samples in the file.
    pub len: u64,
    /// How long after the mixed output was enabled this source started.
    pub offset: Duration,
}

impl Track {
    fn is_empty(&self) -> bool {
        self.len == 0 || self.sample_rate == 0
    }
}

pub struct AudioMixer;

impl AudioMixer {
    /// The rate a set of tracks is mixed at: the highest rate among them.
    pub fn output_rate(tracks: &[Track], fallback: u32) -> u32 {
        tracks
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| t.sample_rate)
            .max()
            .unwrap_or(fallback)
    }

    /// Resample every track to the output rate, delay each by its offset and
    /// write their average to `output`. Shorter tracks are zero-padded.
    /// Returns the number of samples written.
    pub fn mix_to_file(tracks: &[Track], output: &Path, fallback_rate: u32) -> Result<u64, hound::Error> {
        let rate = Self::output_rate(tracks, fallback_rate);
        let mut cursors = tracks
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| TrackCursor::open(t, rate))
            .collect::<Result<Vec<_>, _>>()?;
        let sources = cursors.len().max(1) as f32;

        let mut writer = WavWriter::create(output, mono_spec(rate))?;
        let mut position: u64 = 0;
        loop {
            let mut sum = 0.0f32;
            let mut live = false;
            for cursor in &mut cursors {
                if let Some(sample) = cursor.sample_at(position)? {
                    sum += sample;
                    live = true;
                }
            }
            if !live {
                break;
            }
            writer.write_sample((sum / sources).clamp(-1.0, 1.0))?;
            position += 1;
        }
        writer.finalize()?;
        Ok(position)
    }
}

/// Streaming linear-interpolation reader over one track.
struct TrackCursor {
    samples: hound::WavIntoSamples<BufReader<File>, f32>,
    /// Source samples per output sample.
    step: f64,
    /// Output samples of silence before the track begins.
    lead: u64,
    /// Source index of `current`.
    index: u64,
    current: Option<f32>,
    next: Option<f32>,
}

impl TrackCursor {
    fn open(track: &Track, output_rate: u32) -> Result<Self, hound::Error> {
        let mut samples = WavReader::open(&track.path)?.into_samples::<f32>();
        let current = samples.next().transpose()?;
        let next = samples.next().transpose()?;
        Ok(Self {
            samples,
            step: track.sample_rate as f64 / output_rate.max(1) as f64,
            lead: (track.offset.as_secs_f64() * output_rate as f64).round() as u64,
            index: 0,
            current,
            next,
        })
    }

    /// The track's value at output position `position`, `None` once it has
    /// run out.
    fn sample_at(&mut self, position: u64) -> Result<Option<f32>, hound::Error> {
        if position < self.lead {
            return Ok(Some(0.0));
        }
        let source_pos = (position - self.lead) as f64 * self.step;
        let whole = source_pos as u64;
        while self.index < whole && self.current.is_some() {
            self.current = self.next.take();
            self.next = self.samples.next().transpose()?;
            self.index += 1;
        }
        if self.index < whole {
            return Ok(None);
        }

        let frac = (source_pos - whole as f64) as f32;
        Ok(match (self.current, self.next) {
            (Some(a), Some(b)) => Some(a + (b - a) * frac),
            (Some(a), None) => Some(a),
            (None, _) => None,
        })
    }
}
