//! Subject locator: finds the monitored client processes running in the
//! caller's own login session and answers ancestry questions used to
//! attribute audio sessions to them.

use std::collections::HashMap;
use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};
use thiserror::Error;

/// How many generations up an audio session's process may sit below a
/// subject and still be attributed to it.
pub const ATTRIBUTION_DEPTH: usize = 3;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Process enumeration failed: {0}")]
    Enumeration(String),
}

/// A monitored process instance, valid for one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub name: String,
    pub parent: Option<u32>,
    /// Terminal session id on Windows, owning uid elsewhere.
    pub session: Option<u32>,
}

/// Point-in-time view of every process on the host.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: HashMap<u32, ProcessEntry>,
    own_session: Option<u32>,
}

impl ProcessTable {
    pub fn new(own_session: Option<u32>) -> Self {
        Self {
            entries: HashMap::new(),
            own_session,
        }
    }

    pub fn insert(&mut self, pid: u32, entry: ProcessEntry) {
        self.entries.insert(pid, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Processes whose executable name equals one of `names`
    /// (case-insensitive) and that live in the caller's session.
    /// Sorted by pid so "first subject" is stable across cycles.
    pub fn find_targets(&self, names: &[String]) -> Vec<Subject> {
        let mut found: Vec<Subject> = self
            .entries
            .iter()
            .filter(|(_, entry)| names.iter().any(|n| n.eq_ignore_ascii_case(&entry.name)))
            .filter(|(_, entry)| match self.own_session {
                Some(own) => entry.session == Some(own),
                None => true,
            })
            .map(|(pid, entry)| Subject {
                pid: *pid,
                name: entry.name.clone(),
            })
            .collect();
        found.sort_by_key(|s| s.pid);
        found
    }

    pub fn name_of(&self, pid: u32) -> Option<&str> {
        self.entries.get(&pid).map(|e| e.name.as_str())
    }

    pub fn parent_of(&self, pid: u32) -> Option<u32> {
        self.entries
            .get(&pid)
            .and_then(|e| e.parent)
            .filter(|parent| *parent != 0 && *parent != pid)
    }

    /// Parent, grandparent, ... up to `depth` generations. Stops at the first
    /// missing link or a cycle back to an already-seen pid.
    pub fn ancestors(&self, pid: u32, depth: usize) -> Vec<u32> {
        let mut chain = Vec::with_capacity(depth);
        let mut current = pid;
        for _ in 0..depth {
            match self.parent_of(current) {
                Some(parent) if parent != pid && !chain.contains(&parent) => {
                    chain.push(parent);
                    current = parent;
                }
                _ => break,
            }
        }
        chain
    }

    pub fn is_descendant_of(&self, child: u32, ancestor: u32, depth: usize) -> bool {
        self.ancestors(child, depth).contains(&ancestor)
    }

    /// Does a session owned by `session_pid` belong to `subject_pid`?
    pub fn attributes_to(&self, session_pid: u32, subject_pid: u32) -> bool {
        session_pid == subject_pid
            || (session_pid != 0 && self.is_descendant_of(session_pid, subject_pid, ATTRIBUTION_DEPTH))
    }

    pub fn describe(&self, pid: u32) -> String {
        match pid {
            0 => "(system)".to_string(),
            _ => self.name_of(pid).unwrap_or("(unknown)").to_string(),
        }
    }
}

pub trait SubjectLocator {
    fn snapshot(&mut self) -> Result<ProcessTable, LocatorError>;
}

/// Locator backed by `sysinfo`.
#[derive(Default)]
pub struct SysinfoLocator;

impl SysinfoLocator {
    pub fn new() -> Self {
        Self
    }
}

impl SubjectLocator for SysinfoLocator {
    fn snapshot(&mut self) -> Result<ProcessTable, LocatorError> {
        let refresh = RefreshKind::new()
            .with_processes(ProcessRefreshKind::new().with_user(UpdateKind::OnlyIfNotSet));
        let sys = System::new_with_specifics(refresh);

        if sys.processes().is_empty() {
            return Err(LocatorError::Enumeration(
                "process list came back empty".to_string(),
            ));
        }

        let own_pid = sysinfo::get_current_pid()
            .map_err(|e| LocatorError::Enumeration(e.to_string()))?;

        let mut table = ProcessTable::new(None);
        for (pid, process) in sys.processes() {
            let pid = pid.as_u32();
            table.insert(
                pid,
                ProcessEntry {
                    name: process.name().to_string_lossy().to_string(),
                    parent: process.parent().map(|p| p.as_u32()),
                    session: session_key(pid, process),
                },
            );
        }

        let own_session = sys
            .process(own_pid)
            .and_then(|process| session_key(own_pid.as_u32(), process));
        table.own_session = own_session;

        Ok(table)
    }
}

#[cfg(windows)]
fn session_key(pid: u32, _process: &sysinfo::Process) -> Option<u32> {
    use windows::Win32::System::RemoteDesktop::ProcessIdToSessionId;

    let mut session = 0u32;
    unsafe { ProcessIdToSessionId(pid, &mut session) }
        .ok()
        .map(|_| session)
}

#[cfg(unix)]
fn session_key(_pid: u32, process: &sysinfo::Process) -> Option<u32> {
    process.user_id().map(|uid| **uid)
}

#[cfg(not(any(windows, unix)))]
fn session_key(_pid: u32, _process: &sysinfo::Process) -> Option<u32> {
    None
}
