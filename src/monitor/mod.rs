pub mod controller;
pub mod policy;
pub mod runner;
pub mod status;

pub use controller::{ActiveCall, CallController, CallState, Collaborators};
pub use policy::{CallPolicy, Counters, PeakHistory, Signals, StopReason, Thresholds, PEAK_THRESHOLD};
pub use status::{ControlFlags, RecordingInfo, StatusHandle};
