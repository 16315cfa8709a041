//! Call lifecycle controller.
//!
//! Owns one record per monitored pid and drives the capture engine from the
//! cycle's signals. Everything here runs on the controller thread only, so
//! none of the per-pid state or the mixed-output count needs a lock.

use super::policy::{CallPolicy, Counters, PeakHistory, Signals, StopReason, Thresholds, PEAK_THRESHOLD};
use super::status::{RecordingInfo, StatusHandle};
use crate::audio::SessionDirectory;
use crate::capture::{CaptureEngine, DeviceCapture, ProcessCapture};
use crate::config::Config;
use crate::naming::{self, MicIdAllocator};
use crate::process::{LocatorError, ProcessTable, Subject, SubjectLocator};
use crate::window::{call_window_present, WindowInspector};
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The controller's OS-facing collaborators.
pub struct Collaborators {
    pub locator: Box<dyn SubjectLocator>,
    pub sessions: SessionDirectory,
    pub windows: Box<dyn WindowInspector>,
    pub capture: Box<dyn CaptureEngine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveCall {
    pub output_path: PathBuf,
    pub process_name: String,
    pub pid: u32,
    pub mic_source_id: Option<u32>,
    pub mixed_enabled: bool,
    pub started_at: Instant,
    pub started_wall: DateTime<Local>,
}

impl ActiveCall {
    fn info(&self) -> RecordingInfo {
        RecordingInfo {
            pid: self.pid,
            process_name: self.process_name.clone(),
            output_path: self.output_path.clone(),
            started_at: self.started_wall,
            mixed_enabled: self.mixed_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Recording(ActiveCall),
}

/// Everything tracked for one pid. Kept in a single map entry so the state,
/// counters and history always appear and disappear together.
#[derive(Debug)]
struct TrackedSubject {
    name: String,
    policy: CallPolicy,
    call: CallState,
    counters: Counters,
    history: PeakHistory,
}

impl TrackedSubject {
    fn new(subject: &Subject, config: &Config) -> Self {
        let policy =
            CallPolicy::for_process(&subject.name, &config.monitoring.window_signal_clients);
        debug!(
            "Tracking {} PID={} ({} policy)",
            subject.name,
            subject.pid,
            policy.label()
        );
        Self {
            name: subject.name.clone(),
            policy,
            call: CallState::Idle,
            counters: Counters::default(),
            history: PeakHistory::default(),
        }
    }
}

enum Step {
    Hold,
    Start,
    Stop(StopReason),
}

pub struct CallController {
    locator: Box<dyn SubjectLocator>,
    sessions: SessionDirectory,
    windows: Box<dyn WindowInspector>,
    capture: Box<dyn CaptureEngine>,
    subjects: HashMap<u32, TrackedSubject>,
    active_mixed: u32,
    /// File every mixed call writes into while `active_mixed > 0`.
    mixed_path: Option<PathBuf>,
    mic_ids: MicIdAllocator,
    status: StatusHandle,
    user_name: String,
}

impl CallController {
    pub fn new(collaborators: Collaborators, status: StatusHandle, user_name: String) -> Self {
        let Collaborators {
            locator,
            sessions,
            windows,
            capture,
        } = collaborators;
        Self {
            locator,
            sessions,
            windows,
            capture,
            subjects: HashMap::new(),
            active_mixed: 0,
            mixed_path: None,
            mic_ids: MicIdAllocator::new(),
            status,
            user_name,
        }
    }

    /// One polling cycle against a config snapshot.
    pub fn poll_cycle(&mut self, config: &Config, now: Instant) -> Result<(), LocatorError> {
        let table = self.locator.snapshot()?;
        let targets = table.find_targets(&config.processes.targets);
        for subject in &targets {
            debug!("Found target: {} PID={}", subject.name, subject.pid);
        }

        self.sessions.refresh();
        self.sessions
            .set_dump_every(config.monitoring.diagnostics_every_cycles);
        self.sessions.tick_diagnostics(&table);

        let thresholds = Thresholds::from(&config.monitoring);
        for subject in &targets {
            match self.evaluate(subject, &table, config, &thresholds, now) {
                Step::Hold => {}
                Step::Start => {
                    self.start_recording(subject, config, now);
                }
                Step::Stop(reason) => {
                    self.stop_recording(subject.pid, reason.as_str());
                }
            }
        }

        let present: HashSet<u32> = targets.iter().map(|s| s.pid).collect();
        self.remove_missing(&present);

        self.publish();
        Ok(())
    }

    fn evaluate(
        &mut self,
        subject: &Subject,
        table: &ProcessTable,
        config: &Config,
        thresholds: &Thresholds,
        now: Instant,
    ) -> Step {
        let tracked = self
            .subjects
            .entry(subject.pid)
            .or_insert_with(|| TrackedSubject::new(subject, config));

        let peak = self.sessions.peak_level(subject.pid, table);
        let session_active = self.sessions.is_session_active(subject.pid, table);
        tracked.history.push(peak, thresholds.peak_history_size);

        let recording = matches!(tracked.call, CallState::Recording(_));
        let call_window = match tracked.policy.main_title_prefix() {
            Some(prefix) if recording || peak > PEAK_THRESHOLD => {
                call_window_present(self.windows.as_mut(), subject.pid, prefix)
            }
            _ => false,
        };

        let signals = Signals {
            peak,
            session_active,
            call_window,
        };

        match &tracked.call {
            CallState::Idle => {
                let fire = tracked.policy.should_start(
                    &signals,
                    &mut tracked.counters,
                    thresholds.start_threshold,
                );
                if peak > PEAK_THRESHOLD {
                    debug!(
                        "Audio detected: {} PID={} peak={:.4} active={} window={} count={}/{}",
                        tracked.name,
                        subject.pid,
                        peak,
                        session_active,
                        call_window,
                        if fire { thresholds.start_threshold } else { tracked.counters.start },
                        thresholds.start_threshold
                    );
                }
                if fire {
                    Step::Start
                } else {
                    Step::Hold
                }
            }
            CallState::Recording(call) => {
                let elapsed = now.saturating_duration_since(call.started_at);
                let decision = tracked.policy.should_stop(
                    &signals,
                    &tracked.history,
                    &mut tracked.counters,
                    thresholds,
                    elapsed,
                );
                debug!(
                    "Recording {} PID={} peak={:.4} avg={:.4} active={} window={} silence={} inactive={} elapsed={}s",
                    tracked.name,
                    subject.pid,
                    peak,
                    tracked.history.average(),
                    session_active,
                    call_window,
                    tracked.counters.silence,
                    tracked.counters.inactive,
                    elapsed.as_secs()
                );
                match decision {
                    Some(reason) => Step::Stop(reason),
                    None => Step::Hold,
                }
            }
        }
    }

    /// Run the start sequence for `subject`. Returns false, leaving the
    /// subject idle, if process capture could not be started.
    fn start_recording(&mut self, subject: &Subject, config: &Config, now: Instant) -> bool {
        let format = config.recording.format;
        let bitrate = config.recording.bitrate;
        let started_wall = Local::now();
        let output_path = naming::prepare_output_path(
            &config.recording.recordings_dir(),
            &self.user_name,
            &subject.name,
            format,
            started_wall,
        );

        let mut process = ProcessCapture {
            subject_id: subject.pid,
            source_name: subject.name.clone(),
            output_path: output_path.clone(),
            format,
            bitrate,
            monitor_only: true,
            mic_device_id: None,
            is_process_source: true,
        };
        if let Err(e) = self.capture.start_capture(&process) {
            error!("REC FAIL (process): {} PID={}: {}", subject.name, subject.pid, e);
            return false;
        }

        let mut mic_source_id = match self.capture.default_microphone() {
            Some(mic) => {
                let id = self.mic_ids.next_id();
                let request = DeviceCapture {
                    id,
                    device_name: mic.friendly_name.clone(),
                    device_id: mic.id,
                    is_input: true,
                    output_path: output_path.clone(),
                    format,
                    bitrate,
                    monitor_only: true,
                };
                match self.capture.start_capture_from_device(&request) {
                    Ok(()) => Some(id),
                    Err(e) => {
                        warn!("Mic capture failed: {}: {}", mic.friendly_name, e);
                        None
                    }
                }
            }
            None => {
                warn!("No microphone found, recording {} audio only", subject.name);
                None
            }
        };

        let mixed = match &self.mixed_path {
            Some(path) if self.active_mixed > 0 => {
                debug!(
                    "Mixed output already on for {} call(s), {} joins {:?}",
                    self.active_mixed, subject.name, path
                );
                Ok(path.clone())
            }
            _ => self
                .capture
                .enable_mixed_recording(&output_path, format, bitrate)
                .map(|()| output_path.clone()),
        };

        let (mixed_enabled, output_path) = match mixed {
            Ok(path) => {
                self.active_mixed += 1;
                self.mixed_path = Some(path.clone());
                (true, path)
            }
            Err(e) => {
                warn!("Mixed recording failed, falling back to process-only: {}", e);
                self.capture.stop_capture(subject.pid);
                if let Some(id) = mic_source_id.take() {
                    self.capture.stop_capture(id);
                }
                process.monitor_only = false;
                if let Err(e) = self.capture.start_capture(&process) {
                    error!("REC FAIL (fallback): {} PID={}: {}", subject.name, subject.pid, e);
                    return false;
                }
                (false, output_path)
            }
        };

        let call = ActiveCall {
            output_path,
            process_name: subject.name.clone(),
            pid: subject.pid,
            mic_source_id,
            mixed_enabled,
            started_at: now,
            started_wall,
        };
        info!(
            "REC START: {} PID={} -> {:?}",
            call.process_name, call.pid, call.output_path
        );

        let tracked = self
            .subjects
            .entry(subject.pid)
            .or_insert_with(|| TrackedSubject::new(subject, config));
        tracked.call = CallState::Recording(call);
        tracked.counters.reset();
        true
    }

    /// Stop sequence for one pid. Returns false when it was not recording,
    /// which makes repeated calls harmless.
    fn stop_recording(&mut self, pid: u32, reason: &str) -> bool {
        let Some(tracked) = self.subjects.get_mut(&pid) else {
            return false;
        };
        let CallState::Recording(call) = std::mem::take(&mut tracked.call) else {
            return false;
        };
        tracked.counters.reset();
        tracked.history.clear();

        if call.mixed_enabled {
            self.release_mixed();
        }
        if let Some(mic) = call.mic_source_id {
            self.capture.stop_capture(mic);
        }
        self.capture.stop_capture(call.pid);

        info!(
            "REC STOP ({}): {} PID={} -> {:?}",
            reason, call.process_name, call.pid, call.output_path
        );
        true
    }

    fn release_mixed(&mut self) {
        match self.active_mixed {
            0 => {
                warn!("Mixed output released with no active mixed calls");
                self.mixed_path = None;
            }
            1 => {
                self.active_mixed = 0;
                self.mixed_path = None;
                self.capture.disable_mixed_recording();
                debug!("Last mixed call ended, mixed output disabled");
            }
            _ => self.active_mixed -= 1,
        }
    }

    fn remove_missing(&mut self, present: &HashSet<u32>) {
        let gone: Vec<u32> = self
            .subjects
            .keys()
            .filter(|pid| !present.contains(pid))
            .copied()
            .collect();

        for pid in gone {
            if self.stop_recording(pid, "exited") {
                warn!("PID={} exited while recording", pid);
            }
            self.subjects.remove(&pid);
            debug!("Forgot PID={}", pid);
        }
    }

    /// Start recording the first matching subject that is not already
    /// recording, skipping hysteresis. Returns the pid that started.
    pub fn force_start(&mut self, config: &Config, now: Instant) -> Result<Option<u32>, LocatorError> {
        info!("Force start recording requested");
        let table = self.locator.snapshot()?;
        let targets = table.find_targets(&config.processes.targets);

        let mut started = None;
        for subject in &targets {
            if self.is_recording(subject.pid) {
                continue;
            }
            self.subjects
                .entry(subject.pid)
                .or_insert_with(|| TrackedSubject::new(subject, config));
            if self.start_recording(subject, config, now) {
                started = Some(subject.pid);
                break;
            }
        }

        if started.is_none() {
            info!("Force start: nothing to record");
        }
        self.publish();
        Ok(started)
    }

    /// Stop every recording regardless of minimum duration and forget all
    /// tracked subjects.
    pub fn force_stop(&mut self) -> usize {
        info!("Force stop recording requested");
        let stopped = self.stop_all("forced");
        self.subjects.clear();
        self.publish();
        stopped
    }

    fn stop_all(&mut self, reason: &str) -> usize {
        let mut pids: Vec<u32> = self.subjects.keys().copied().collect();
        pids.sort_unstable();
        pids.into_iter()
            .filter(|pid| self.stop_recording(*pid, reason))
            .count()
    }

    /// Final teardown when the controller thread exits.
    pub fn shutdown(&mut self) {
        let stopped = self.stop_all("shutdown");
        self.subjects.clear();
        self.capture.stop_all_captures();
        self.publish();
        info!("Call monitor stopped ({} recording(s) closed)", stopped);
    }

    fn publish(&self) {
        let mut recordings: Vec<RecordingInfo> = self
            .subjects
            .values()
            .filter_map(|tracked| match &tracked.call {
                CallState::Recording(call) => Some(call.info()),
                CallState::Idle => None,
            })
            .collect();
        recordings.sort_by_key(|r| r.pid);
        self.status.set_active_count(recordings.len());
        self.status.publish(recordings);
    }

    pub fn is_recording(&self, pid: u32) -> bool {
        matches!(
            self.subjects.get(&pid).map(|t| &t.call),
            Some(CallState::Recording(_))
        )
    }

    pub fn call(&self, pid: u32) -> Option<&ActiveCall> {
        match self.subjects.get(&pid).map(|t| &t.call) {
            Some(CallState::Recording(call)) => Some(call),
            _ => None,
        }
    }

    pub fn tracked_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.subjects.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn counters(&self, pid: u32) -> Option<Counters> {
        self.subjects.get(&pid).map(|t| t.counters)
    }

    pub fn history_len(&self, pid: u32) -> Option<usize> {
        self.subjects.get(&pid).map(|t| t.history.len())
    }

    pub fn active_mixed_count(&self) -> u32 {
        self.active_mixed
    }

    pub fn mixed_path(&self) -> Option<&std::path::Path> {
        self.mixed_path.as_deref()
    }

    pub fn recording_count(&self) -> usize {
        self.subjects
            .values()
            .filter(|t| matches!(t.call, CallState::Recording(_)))
            .count()
    }

    /// Time the given pid has been recording, if it is.
    pub fn elapsed(&self, pid: u32, now: Instant) -> Option<Duration> {
        self.call(pid)
            .map(|call| now.saturating_duration_since(call.started_at))
    }
}
