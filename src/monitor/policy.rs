//! Start/stop decisions per client family.
//!
//! Pure state: every function here takes the cycle's signals and the
//! subject's counters and nothing else, so the hysteresis rules can be
//! exercised without any OS collaborator.

use crate::config::{MonitoringConfig, WindowSignalClient};
use std::collections::VecDeque;
use std::time::Duration;

/// Peak above which a cycle counts as "real audio".
pub const PEAK_THRESHOLD: f32 = 0.01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPolicy {
    /// Session activity ends the call, loudness is a slow fallback.
    Generic,
    /// The client's session stays active while its chat window is open;
    /// a non-main window marks the call.
    WindowSignal { main_title_prefix: String },
}

impl CallPolicy {
    pub fn for_process(process_name: &str, clients: &[WindowSignalClient]) -> Self {
        let lower = process_name.to_lowercase();
        clients
            .iter()
            .find(|c| lower.contains(&c.process_name_contains.to_lowercase()))
            .map(|c| Self::WindowSignal {
                main_title_prefix: c.main_title_prefix.clone(),
            })
            .unwrap_or(Self::Generic)
    }

    pub fn main_title_prefix(&self) -> Option<&str> {
        match self {
            Self::Generic => None,
            Self::WindowSignal { main_title_prefix } => Some(main_title_prefix),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::WindowSignal { .. } => "window-signal",
        }
    }

    fn start_qualifies(&self, signals: &Signals) -> bool {
        let loud = signals.peak > PEAK_THRESHOLD;
        match self {
            Self::Generic => loud && signals.session_active,
            Self::WindowSignal { .. } => loud && signals.call_window,
        }
    }

    /// Advance the start counter for one idle cycle. Returns true when the
    /// recording should start; the counter is reset in that case.
    pub fn should_start(&self, signals: &Signals, counters: &mut Counters, threshold: u32) -> bool {
        if !self.start_qualifies(signals) {
            counters.start = counters.start.saturating_sub(1);
            return false;
        }

        counters.start += 1;
        if counters.start >= threshold.max(1) {
            counters.start = 0;
            return true;
        }
        false
    }

    /// Advance the stop counters for one recording cycle.
    ///
    /// Nothing accumulates before `min_recording` has elapsed.
    pub fn should_stop(
        &self,
        signals: &Signals,
        history: &PeakHistory,
        counters: &mut Counters,
        thresholds: &Thresholds,
        elapsed: Duration,
    ) -> Option<StopReason> {
        if elapsed < thresholds.min_recording {
            counters.silence = 0;
            counters.inactive = 0;
            return None;
        }

        let (ended, reason, limit) = match self {
            Self::Generic => (
                !signals.session_active,
                StopReason::SessionInactive,
                thresholds.inactive_confirm_cycles,
            ),
            Self::WindowSignal { .. } => {
                let reason = if signals.call_window {
                    StopReason::SessionInactive
                } else {
                    StopReason::CallWindowClosed
                };
                (
                    !signals.call_window || !signals.session_active,
                    reason,
                    thresholds.client_silence_cycles,
                )
            }
        };

        if ended {
            counters.silence = 0;
            counters.inactive += 1;
            let count = counters.inactive;
            return Self::fire(counters, count, limit, reason);
        }
        counters.inactive = 0;

        let quiet = match self {
            Self::Generic => signals.peak <= PEAK_THRESHOLD,
            Self::WindowSignal { .. } => history.average() < thresholds.silence_peak_threshold,
        };

        if quiet {
            counters.silence += 1;
            let count = counters.silence;
            let limit = match self {
                Self::Generic => thresholds.silence_threshold,
                Self::WindowSignal { .. } => thresholds.average_silence_cycles,
            };
            return Self::fire(counters, count, limit, StopReason::Silence);
        }

        counters.silence = 0;
        None
    }

    fn fire(counters: &mut Counters, count: u32, limit: u32, reason: StopReason) -> Option<StopReason> {
        if count >= limit.max(1) {
            counters.reset();
            Some(reason)
        } else {
            None
        }
    }
}

/// What the controller observed for one subject in one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    pub peak: f32,
    pub session_active: bool,
    /// Always false for generic subjects.
    pub call_window: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SessionInactive,
    CallWindowClosed,
    Silence,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInactive => "session inactive",
            Self::CallWindowClosed => "call window closed",
            Self::Silence => "silence",
        }
    }
}

/// Hysteresis counters for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub start: u32,
    pub silence: u32,
    pub inactive: u32,
}

impl Counters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Cycle counts and limits the policies read, taken from one config snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub start_threshold: u32,
    pub silence_threshold: u32,
    pub inactive_confirm_cycles: u32,
    pub client_silence_cycles: u32,
    pub average_silence_cycles: u32,
    pub silence_peak_threshold: f32,
    pub peak_history_size: usize,
    pub min_recording: Duration,
}

impl From<&MonitoringConfig> for Thresholds {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            start_threshold: config.start_threshold,
            silence_threshold: config.silence_threshold,
            inactive_confirm_cycles: config.inactive_confirm_cycles,
            client_silence_cycles: config.client_silence_cycles,
            average_silence_cycles: config.average_silence_cycles,
            silence_peak_threshold: config.silence_peak_threshold,
            peak_history_size: config.peak_history_size,
            min_recording: Duration::from_secs(config.min_recording_seconds),
        }
    }
}

/// Most recent peak samples, oldest evicted first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakHistory {
    samples: VecDeque<f32>,
}

impl PeakHistory {
    pub fn push(&mut self, peak: f32, capacity: usize) {
        self.samples.push_back(peak);
        while self.samples.len() > capacity.max(1) {
            self.samples.pop_front();
        }
    }

    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
