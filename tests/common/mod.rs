//! Scriptable stand-ins for every OS collaborator of the call controller.

#![allow(dead_code)]

use callwatch::audio::{
    DeviceSessions, DirectoryError, SessionBackend, SessionDirectory, SessionSample, SessionState,
};
use callwatch::capture::{CaptureEngine, CaptureError, DeviceCapture, MicDevice, ProcessCapture};
use callwatch::config::{AudioFormat, Config};
use callwatch::monitor::{CallController, Collaborators, StatusHandle};
use callwatch::process::{LocatorError, ProcessEntry, ProcessTable, SubjectLocator};
use callwatch::window::WindowInspector;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Default)]
pub struct World {
    pub processes: Vec<(u32, String)>,
    pub sessions: HashMap<u32, SessionSample>,
    pub windows: HashMap<u32, Vec<String>>,
    pub fail_sessions: bool,
    pub fail_locator: bool,
    pub snapshots: usize,
}

pub type SharedWorld = Arc<Mutex<World>>;

pub struct FakeLocator(pub SharedWorld);

impl SubjectLocator for FakeLocator {
    fn snapshot(&mut self) -> Result<ProcessTable, LocatorError> {
        let mut world = self.0.lock().unwrap();
        world.snapshots += 1;
        if world.fail_locator {
            return Err(LocatorError::Enumeration("scripted failure".into()));
        }
        let mut table = ProcessTable::new(None);
        for (pid, name) in &world.processes {
            table.insert(
                *pid,
                ProcessEntry {
                    name: name.clone(),
                    parent: Some(1),
                    session: None,
                },
            );
        }
        Ok(table)
    }
}

pub struct FakeSessions(pub SharedWorld);

impl SessionBackend for FakeSessions {
    fn default_device_sessions(&mut self) -> Result<Vec<SessionSample>, DirectoryError> {
        let world = self.0.lock().unwrap();
        if world.fail_sessions {
            return Err(DirectoryError::Query("scripted failure".into()));
        }
        Ok(world.sessions.values().cloned().collect())
    }

    fn all_device_sessions(&mut self) -> Result<Vec<DeviceSessions>, DirectoryError> {
        Ok(vec![DeviceSessions {
            device_id: "speakers".into(),
            sessions: self.default_device_sessions()?,
        }])
    }

    fn reset(&mut self) {}
}

pub struct FakeWindows(pub SharedWorld);

impl WindowInspector for FakeWindows {
    fn visible_window_titles(&mut self, pid: u32) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .windows
            .get(&pid)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    StartProcess { id: u32, monitor_only: bool },
    StartDevice { id: u32 },
    EnableMixed,
    DisableMixed,
    Stop(u32),
    StopAll,
}

#[derive(Default)]
pub struct EngineScript {
    pub calls: Vec<EngineCall>,
    pub microphone: Option<MicDevice>,
    pub fail_process_start: bool,
    pub fail_mic_start: bool,
    pub fail_mixed: bool,
    /// Every file the engine was told to write: mixed outputs and direct
    /// captures.
    pub written_paths: Vec<PathBuf>,
}

pub type SharedEngine = Arc<Mutex<EngineScript>>;

pub struct FakeEngine(pub SharedEngine);

impl CaptureEngine for FakeEngine {
    fn default_microphone(&mut self) -> Option<MicDevice> {
        self.0.lock().unwrap().microphone.clone()
    }

    fn start_capture(&mut self, request: &ProcessCapture) -> Result<(), CaptureError> {
        let mut script = self.0.lock().unwrap();
        script.calls.push(EngineCall::StartProcess {
            id: request.subject_id,
            monitor_only: request.monitor_only,
        });
        if script.fail_process_start {
            return Err(CaptureError::NoDevice("scripted".into()));
        }
        if !request.monitor_only {
            script.written_paths.push(request.output_path.clone());
        }
        Ok(())
    }

    fn start_capture_from_device(&mut self, request: &DeviceCapture) -> Result<(), CaptureError> {
        let mut script = self.0.lock().unwrap();
        script.calls.push(EngineCall::StartDevice { id: request.id });
        if script.fail_mic_start {
            return Err(CaptureError::Stream("scripted".into()));
        }
        Ok(())
    }

    fn enable_mixed_recording(
        &mut self,
        output_path: &Path,
        format: AudioFormat,
        _bitrate: u32,
    ) -> Result<(), CaptureError> {
        let mut script = self.0.lock().unwrap();
        script.calls.push(EngineCall::EnableMixed);
        if script.fail_mixed {
            return Err(CaptureError::UnsupportedFormat(format));
        }
        script.written_paths.push(output_path.to_path_buf());
        Ok(())
    }

    fn disable_mixed_recording(&mut self) {
        self.0.lock().unwrap().calls.push(EngineCall::DisableMixed);
    }

    fn stop_capture(&mut self, id: u32) {
        self.0.lock().unwrap().calls.push(EngineCall::Stop(id));
    }

    fn stop_all_captures(&mut self) {
        self.0.lock().unwrap().calls.push(EngineCall::StopAll);
    }
}

pub fn microphone() -> MicDevice {
    MicDevice {
        id: "{mic-1}".into(),
        friendly_name: "Headset Microphone".into(),
    }
}

pub fn build_controller(world: &SharedWorld, engine: &SharedEngine, status: StatusHandle) -> CallController {
    CallController::new(
        Collaborators {
            locator: Box::new(FakeLocator(world.clone())),
            sessions: SessionDirectory::new(Box::new(FakeSessions(world.clone())), 0),
            windows: Box::new(FakeWindows(world.clone())),
            capture: Box::new(FakeEngine(engine.clone())),
        },
        status,
        "Test User".to_string(),
    )
}

pub fn test_config(recordings: &Path) -> Config {
    let mut config = Config::default();
    config.recording.path = recordings.to_string_lossy().into_owned();
    config.monitoring.diagnostics_every_cycles = 0;
    config.validate();
    config
}

/// A controller wired to fakes, driven with explicit timestamps.
pub struct Harness {
    pub world: SharedWorld,
    pub engine: SharedEngine,
    pub status: StatusHandle,
    pub config: Config,
    pub controller: CallController,
    pub base: Instant,
    _recordings: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let recordings = tempfile::tempdir().unwrap();
        let world = SharedWorld::default();
        let engine = SharedEngine::new(Mutex::new(EngineScript {
            microphone: Some(microphone()),
            ..Default::default()
        }));
        let status = StatusHandle::default();
        let controller = build_controller(&world, &engine, status.clone());
        Self {
            config: test_config(recordings.path()),
            world,
            engine,
            status,
            controller,
            base: Instant::now(),
            _recordings: recordings,
        }
    }

    pub fn spawn(&self, pid: u32, name: &str) {
        self.world.lock().unwrap().processes.push((pid, name.to_string()));
    }

    pub fn kill(&self, pid: u32) {
        let mut world = self.world.lock().unwrap();
        world.processes.retain(|(p, _)| *p != pid);
        world.sessions.remove(&pid);
    }

    pub fn audio(&self, pid: u32, peak: f32, active: bool) {
        let state = if active {
            SessionState::Active
        } else {
            SessionState::Inactive
        };
        self.world.lock().unwrap().sessions.insert(
            pid,
            SessionSample {
                pid,
                peak,
                state: Some(state),
            },
        );
    }

    pub fn windows(&self, pid: u32, titles: &[&str]) {
        self.world
            .lock()
            .unwrap()
            .windows
            .insert(pid, titles.iter().map(|t| t.to_string()).collect());
    }

    pub fn at(&self, secs: u64) -> Instant {
        self.base + Duration::from_secs(secs)
    }

    pub fn poll(&mut self, secs: u64) {
        let now = self.at(secs);
        self.controller.poll_cycle(&self.config, now).unwrap();
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.engine.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.engine.lock().unwrap().calls.clear();
    }

    /// Every output path the status reports must be a file the engine is
    /// actually writing.
    pub fn assert_reported_paths_written(&self) {
        let written = self.engine.lock().unwrap().written_paths.clone();
        for info in self.status.recordings().iter() {
            assert!(
                written.contains(&info.output_path),
                "{} PID={} reports {:?}, engine writes {:?}",
                info.process_name,
                info.pid,
                info.output_path,
                written
            );
        }
    }

    /// Enable and disable of the mixed output must strictly alternate,
    /// starting with an enable.
    pub fn assert_mixed_alternates(&self) {
        let mut enabled = false;
        for call in self.calls() {
            match call {
                EngineCall::EnableMixed => {
                    assert!(!enabled, "mixed output enabled twice in a row");
                    enabled = true;
                }
                EngineCall::DisableMixed => {
                    assert!(enabled, "mixed output disabled while not enabled");
                    enabled = false;
                }
                _ => {}
            }
        }
    }
}
