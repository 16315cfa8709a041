//! Audio session directory: per-process loudness and session activity.
//!
//! The platform backend only enumerates sessions. Everything that decides
//! what a subject's peak or activity *is* lives here so the contract holds on
//! every platform:
//!
//! - peak is the loudest matching session, `0.0` if nothing could be queried
//! - activity fails open: a failed query reports the subject as active so a
//!   transient error never ends a recording
//! - a failed query drops the backend's cached handles, so a default-device
//!   change heals itself on the next cycle

use crate::process::ProcessTable;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Audio subsystem unavailable: {0}")]
    Unavailable(String),
    #[error("Session query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Inactive,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        }
    }
}

/// One playback session as reported by the OS.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSample {
    pub pid: u32,
    pub peak: f32,
    /// `None` when the state query itself failed.
    pub state: Option<SessionState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSessions {
    pub device_id: String,
    pub sessions: Vec<SessionSample>,
}

/// Platform seam over the OS audio session API.
pub trait SessionBackend {
    /// Sessions on the default playback device.
    fn default_device_sessions(&mut self) -> Result<Vec<SessionSample>, DirectoryError>;

    /// Every active playback device with its sessions.
    fn all_device_sessions(&mut self) -> Result<Vec<DeviceSessions>, DirectoryError>;

    /// Drop cached OS handles; the next query re-acquires them.
    fn reset(&mut self);
}

pub struct SessionDirectory {
    backend: Box<dyn SessionBackend>,
    current: Result<Vec<SessionSample>, String>,
    dump_every: u32,
    cycles_since_dump: u32,
}

impl SessionDirectory {
    pub fn new(backend: Box<dyn SessionBackend>, dump_every: u32) -> Self {
        Self {
            backend,
            current: Err("not queried yet".to_string()),
            dump_every,
            cycles_since_dump: 0,
        }
    }

    pub fn set_dump_every(&mut self, cycles: u32) {
        self.dump_every = cycles;
    }

    /// Take one enumeration for this poll cycle. All per-pid queries until
    /// the next refresh answer from it.
    pub fn refresh(&mut self) {
        self.current = match self.backend.default_device_sessions() {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                debug!("Audio session query failed, resetting directory: {}", e);
                self.backend.reset();
                Err(e.to_string())
            }
        };
    }

    fn matching<'a>(
        sessions: &'a [SessionSample],
        pid: u32,
        tree: &'a ProcessTable,
    ) -> impl Iterator<Item = &'a SessionSample> + 'a {
        sessions
            .iter()
            .filter(move |s| tree.attributes_to(s.pid, pid))
    }

    /// Loudest session belonging to `pid` (or its children), in `[0, 1]`.
    pub fn peak_level(&self, pid: u32, tree: &ProcessTable) -> f32 {
        match &self.current {
            Ok(sessions) => Self::matching(sessions, pid, tree)
                .map(|s| s.peak)
                .filter(|p| p.is_finite())
                .fold(0.0f32, f32::max)
                .clamp(0.0, 1.0),
            Err(_) => 0.0,
        }
    }

    /// Whether `pid` has a session the OS still considers active.
    ///
    /// A failed enumeration, or a matching session whose state could not be
    /// read, counts as active. A subject with no session at all is inactive.
    pub fn is_session_active(&self, pid: u32, tree: &ProcessTable) -> bool {
        let sessions = match &self.current {
            Ok(sessions) => sessions,
            Err(_) => return true,
        };

        let mut any = false;
        for session in Self::matching(sessions, pid, tree) {
            any = true;
            match session.state {
                Some(SessionState::Active) | None => return true,
                Some(SessionState::Inactive) | Some(SessionState::Expired) => {}
            }
        }

        if !any {
            debug!("PID={} has no audio session", pid);
        }
        false
    }

    /// Called once per cycle; logs the full device/session list every
    /// `dump_every` cycles.
    pub fn tick_diagnostics(&mut self, tree: &ProcessTable) {
        if self.dump_every == 0 {
            return;
        }
        self.cycles_since_dump += 1;
        if self.cycles_since_dump >= self.dump_every {
            self.cycles_since_dump = 0;
            self.dump_sessions(tree);
        }
    }

    pub fn dump_sessions(&mut self, tree: &ProcessTable) {
        for line in self.describe_sessions(tree) {
            debug!("[diag] {}", line);
        }
    }

    /// Human-readable listing of every render device and its sessions.
    pub fn describe_sessions(&mut self, tree: &ProcessTable) -> Vec<String> {
        let devices = match self.backend.all_device_sessions() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Audio session dump failed: {}", e);
                self.backend.reset();
                return vec![format!("audio session query failed: {e}")];
            }
        };

        let mut lines = vec![format!("Active render devices: {}", devices.len())];
        for (index, device) in devices.iter().enumerate() {
            let short_id: String = device.device_id.chars().take(40).collect();
            lines.push(format!(
                "Device {} ({}): {} sessions",
                index,
                short_id,
                device.sessions.len()
            ));
            for (slot, session) in device.sessions.iter().enumerate() {
                let parent = tree.parent_of(session.pid);
                lines.push(format!(
                    "Dev{} Sess{}: PID={} Name={} ParentPID={} ParentName={} Peak={:.4} State={}",
                    index,
                    slot,
                    session.pid,
                    tree.describe(session.pid),
                    parent.unwrap_or(0),
                    parent
                        .map(|p| tree.describe(p))
                        .unwrap_or_else(|| "(none)".to_string()),
                    session.peak,
                    session.state.map(|s| s.as_str()).unwrap_or("unknown"),
                ));
            }
        }
        lines
    }
}

/// Backend for platforms without a per-process session API: no sessions.
#[derive(Default)]
pub struct NoSessionBackend;

impl SessionBackend for NoSessionBackend {
    fn default_device_sessions(&mut self) -> Result<Vec<SessionSample>, DirectoryError> {
        Ok(Vec::new())
    }

    fn all_device_sessions(&mut self) -> Result<Vec<DeviceSessions>, DirectoryError> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}
