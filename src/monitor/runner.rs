//! The controller thread: poll, honor operator requests, sleep, repeat.

use super::controller::CallController;
use super::status::ControlFlags;
use crate::config::{Config, ConfigHandle};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Granularity of the between-cycle sleep.
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Spawn the controller thread. The controller is built on that thread
/// because its OS handles must not cross threads.
pub fn spawn<F>(
    build: F,
    config: ConfigHandle,
    flags: ControlFlags,
) -> std::io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() -> CallController + Send + 'static,
{
    thread::Builder::new()
        .name("call-monitor".to_string())
        .spawn(move || {
            let controller = build();
            run(controller, &config, &flags);
        })
}

/// Poll until shutdown is requested, then tear every recording down.
pub fn run(mut controller: CallController, config: &ConfigHandle, flags: &ControlFlags) {
    info!("Call monitor running");

    while !flags.shutdown_requested() {
        let snapshot = config.snapshot();

        let cycle = panic::catch_unwind(AssertUnwindSafe(|| {
            controller.poll_cycle(&snapshot, Instant::now())
        }));
        match cycle {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Poll cycle failed: {}", e),
            Err(payload) => error!("Poll cycle panicked: {}", panic_message(&*payload)),
        }

        if flags.take_force_start() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                controller.force_start(&snapshot, Instant::now())
            }));
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Force start failed: {}", e),
                Err(payload) => error!("Force start panicked: {}", panic_message(&*payload)),
            }
        }

        if flags.take_force_stop() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| controller.force_stop()));
            if let Err(payload) = result {
                error!("Force stop panicked: {}", panic_message(&*payload));
            }
        }

        sleep_interruptible(cycle_interval(&snapshot), flags);
    }

    controller.shutdown();
}

/// Pause between cycles, taken from the snapshot the cycle ran against.
pub fn cycle_interval(config: &Config) -> Duration {
    Duration::from_secs(config.monitoring.poll_interval_seconds)
}

/// Sleep up to `total` in short slices, returning early once a request is
/// pending.
pub fn sleep_interruptible(total: Duration, flags: &ControlFlags) {
    let deadline = Instant::now() + total;
    loop {
        if flags.has_pending() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
