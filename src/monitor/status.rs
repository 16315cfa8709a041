//! State the controller shares with the rest of the process: the published
//! recordings snapshot and the operator request flags.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// One in-progress recording, as shown to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub pid: u32,
    pub process_name: String,
    pub output_path: PathBuf,
    pub started_at: DateTime<Local>,
    pub mixed_enabled: bool,
}

impl RecordingInfo {
    pub fn duration_seconds(&self) -> u64 {
        (Local::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Read side of the controller's output. The snapshot is replaced wholesale,
/// so a reader holds an `Arc` and never blocks the controller.
#[derive(Clone, Default)]
pub struct StatusHandle {
    recordings: Arc<RwLock<Arc<[RecordingInfo]>>>,
    active_count: Arc<AtomicUsize>,
}

impl StatusHandle {
    pub fn recordings(&self) -> Arc<[RecordingInfo]> {
        self.recordings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn publish(&self, recordings: Vec<RecordingInfo>) {
        let snapshot: Arc<[RecordingInfo]> = recordings.into();
        *self
            .recordings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot;
    }

    pub(crate) fn set_active_count(&self, count: usize) {
        self.active_count.store(count, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Flags {
    force_start: AtomicBool,
    force_stop: AtomicBool,
    shutdown: AtomicBool,
}

/// Cross-thread requests to the controller. Each request is consumed once.
#[derive(Clone, Default)]
pub struct ControlFlags {
    inner: Arc<Flags>,
}

impl ControlFlags {
    pub fn request_force_start(&self) {
        self.inner.force_start.store(true, Ordering::SeqCst);
    }

    pub fn request_force_stop(&self) {
        self.inner.force_stop.store(true, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn take_force_start(&self) -> bool {
        self.inner.force_start.swap(false, Ordering::SeqCst)
    }

    pub fn take_force_stop(&self) -> bool {
        self.inner.force_stop.swap(false, Ordering::SeqCst)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Something the sleeping controller should wake up for.
    pub fn has_pending(&self) -> bool {
        self.shutdown_requested()
            || self.inner.force_start.load(Ordering::SeqCst)
            || self.inner.force_stop.load(Ordering::SeqCst)
    }
}
