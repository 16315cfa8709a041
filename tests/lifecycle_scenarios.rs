//! End-to-end call lifecycles driven through the controller with scripted
//! processes, audio sessions, windows and a recording capture engine.

mod common;

use callwatch::config::ConfigHandle;
use callwatch::monitor::{runner, ControlFlags, StatusHandle};
use callwatch::process::{LocatorError, ProcessTable, SubjectLocator};
use common::{EngineCall, Harness};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const VIBER: u32 = 4100;
const WHATSAPP: u32 = 4200;
const TELEGRAM: u32 = 4300;
const FIRST_MIC: u32 = 0xF000_0000;

/// Start `pid` with two loud cycles at t=0 and t=2.
fn start_call(h: &mut Harness, pid: u32) {
    h.audio(pid, 0.2, true);
    h.poll(0);
    h.poll(2);
    assert!(h.controller.is_recording(pid), "pid {} should be recording", pid);
}

#[test]
fn test_generic_subject_starts_after_threshold_cycles() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.audio(VIBER, 0.02, true);

    h.poll(0);
    assert!(!h.controller.is_recording(VIBER));
    assert_eq!(h.controller.counters(VIBER).unwrap().start, 1);

    h.poll(2);
    assert!(h.controller.is_recording(VIBER));
    assert_eq!(h.controller.counters(VIBER).unwrap().start, 0);

    h.poll(4);
    assert_eq!(h.count(&EngineCall::EnableMixed), 1);

    assert_eq!(
        h.calls(),
        vec![
            EngineCall::StartProcess {
                id: VIBER,
                monitor_only: true
            },
            EngineCall::StartDevice { id: FIRST_MIC },
            EngineCall::EnableMixed,
        ]
    );

    let call = h.controller.call(VIBER).unwrap();
    assert!(call.mixed_enabled);
    assert_eq!(call.mic_source_id, Some(FIRST_MIC));
    assert_eq!(call.process_name, "Viber.exe");
    assert_eq!(h.controller.active_mixed_count(), 1);
}

#[test]
fn test_start_counter_decays_on_quiet_cycles() {
    let mut h = Harness::new();
    h.config.monitoring.start_threshold = 3;
    h.spawn(VIBER, "Viber.exe");

    h.audio(VIBER, 0.2, true);
    h.poll(0);
    h.poll(2);
    assert_eq!(h.controller.counters(VIBER).unwrap().start, 2);

    h.audio(VIBER, 0.0, true);
    h.poll(4);
    assert_eq!(h.controller.counters(VIBER).unwrap().start, 1);

    h.audio(VIBER, 0.2, true);
    h.poll(6);
    assert!(!h.controller.is_recording(VIBER));
    h.poll(8);
    assert!(h.controller.is_recording(VIBER));
}

#[test]
fn test_loud_but_inactive_session_does_not_start_generic_subject() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.audio(VIBER, 0.5, false);

    for t in 0..5 {
        h.poll(t * 2);
    }
    assert!(!h.controller.is_recording(VIBER));
    assert!(h.calls().is_empty());
}

#[test]
fn test_window_signal_subject_needs_call_window() {
    let mut h = Harness::new();
    h.spawn(TELEGRAM, "Telegram.exe");
    h.audio(TELEGRAM, 0.3, true);
    h.windows(TELEGRAM, &["Telegram"]);

    for t in 0..5 {
        h.poll(t * 2);
    }
    assert!(!h.controller.is_recording(TELEGRAM));

    h.windows(TELEGRAM, &["Telegram", "Alice Smith"]);
    h.poll(10);
    h.poll(12);
    assert!(h.controller.is_recording(TELEGRAM));
}

#[test]
fn test_generic_stops_on_third_inactive_cycle_after_min_duration() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    h.audio(VIBER, 0.0, false);
    h.poll(72);
    h.poll(74);
    assert!(h.controller.is_recording(VIBER));
    assert_eq!(h.controller.counters(VIBER).unwrap().inactive, 2);

    h.poll(76);
    assert!(!h.controller.is_recording(VIBER));
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(h.count(&EngineCall::DisableMixed), 1);
    assert_eq!(h.count(&EngineCall::Stop(FIRST_MIC)), 1);
    assert_eq!(h.count(&EngineCall::Stop(VIBER)), 1);
    assert_eq!(h.controller.tracked_pids(), vec![VIBER]);
}

#[test]
fn test_no_stop_before_min_duration() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    h.audio(VIBER, 0.0, false);
    for t in (4..60).step_by(2) {
        h.poll(t);
        let counters = h.controller.counters(VIBER).unwrap();
        assert_eq!(counters.inactive, 0);
        assert_eq!(counters.silence, 0);
    }
    assert!(h.controller.is_recording(VIBER));

    h.poll(62);
    h.poll(64);
    h.poll(66);
    assert!(!h.controller.is_recording(VIBER));
}

#[test]
fn test_generic_loudness_fallback_stops_active_but_silent_call() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    h.audio(VIBER, 0.0, true);
    let mut t = 70;
    for _ in 0..14 {
        h.poll(t);
        t += 2;
    }
    assert!(h.controller.is_recording(VIBER));
    h.poll(t);
    assert!(!h.controller.is_recording(VIBER));
}

#[test]
fn test_window_signal_stops_when_call_window_closes() {
    let mut h = Harness::new();
    h.spawn(TELEGRAM, "Telegram.exe");
    h.windows(TELEGRAM, &["Telegram", "Bob"]);
    start_call(&mut h, TELEGRAM);

    h.windows(TELEGRAM, &["Telegram"]);
    h.poll(70);
    h.poll(72);
    assert!(h.controller.is_recording(TELEGRAM));
    h.poll(74);
    assert!(!h.controller.is_recording(TELEGRAM));
}

#[test]
fn test_window_signal_stops_on_sustained_low_average() {
    let mut h = Harness::new();
    h.config.monitoring.average_silence_cycles = 4;
    h.spawn(TELEGRAM, "Telegram.exe");
    h.windows(TELEGRAM, &["Telegram", "Bob"]);
    start_call(&mut h, TELEGRAM);

    h.audio(TELEGRAM, 0.0, true);
    // The rolling average needs a few quiet cycles to drop below the floor.
    let mut t = 70;
    let mut cycles = 0;
    while h.controller.is_recording(TELEGRAM) && cycles < 20 {
        h.poll(t);
        t += 2;
        cycles += 1;
    }
    assert!(!h.controller.is_recording(TELEGRAM));
    assert!(cycles >= 4);
}

#[test]
fn test_simultaneous_calls_report_the_file_being_written() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.spawn(WHATSAPP, "WhatsApp.exe");
    h.audio(VIBER, 0.2, true);
    h.audio(WHATSAPP, 0.2, true);
    h.poll(0);
    h.poll(2);

    assert!(h.controller.is_recording(VIBER));
    assert!(h.controller.is_recording(WHATSAPP));
    assert_eq!(h.count(&EngineCall::EnableMixed), 1);
    h.assert_reported_paths_written();

    let viber = h.controller.call(VIBER).unwrap().output_path.clone();
    let whatsapp = h.controller.call(WHATSAPP).unwrap().output_path.clone();
    assert_eq!(viber, whatsapp);
    assert_eq!(h.controller.mixed_path(), Some(viber.as_path()));
}

#[test]
fn test_concurrent_calls_share_one_mixed_output() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.spawn(WHATSAPP, "WhatsApp.exe");
    h.audio(VIBER, 0.2, true);
    h.poll(0);
    h.poll(2);
    assert_eq!(h.controller.active_mixed_count(), 1);

    h.audio(WHATSAPP, 0.2, true);
    h.poll(4);
    h.poll(6);
    assert!(h.controller.is_recording(WHATSAPP));
    assert_eq!(h.controller.active_mixed_count(), 2);
    assert_eq!(h.count(&EngineCall::EnableMixed), 1);
    h.assert_reported_paths_written();

    let viber_mic = h.controller.call(VIBER).unwrap().mic_source_id.unwrap();
    let whatsapp_mic = h.controller.call(WHATSAPP).unwrap().mic_source_id.unwrap();
    assert_ne!(viber_mic, whatsapp_mic);

    h.audio(VIBER, 0.0, false);
    for t in [70, 72, 74] {
        h.poll(t);
    }
    assert!(!h.controller.is_recording(VIBER));
    assert_eq!(h.controller.active_mixed_count(), 1);
    assert_eq!(h.count(&EngineCall::DisableMixed), 0);

    h.audio(WHATSAPP, 0.0, false);
    for t in [76, 78, 80] {
        h.poll(t);
    }
    assert!(!h.controller.is_recording(WHATSAPP));
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(h.count(&EngineCall::DisableMixed), 1);
    h.assert_mixed_alternates();
}

#[test]
fn test_exited_subject_is_stopped_and_forgotten_in_same_cycle() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);
    h.clear_calls();

    h.kill(VIBER);
    h.poll(10);

    assert!(h.controller.tracked_pids().is_empty());
    assert!(h.controller.counters(VIBER).is_none());
    assert!(h.controller.history_len(VIBER).is_none());
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(
        h.calls(),
        vec![
            EngineCall::DisableMixed,
            EngineCall::Stop(FIRST_MIC),
            EngineCall::Stop(VIBER),
        ]
    );
    assert_eq!(h.status.active_count(), 0);
}

#[test]
fn test_exited_idle_subject_is_forgotten() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.audio(VIBER, 0.2, true);
    h.poll(0);
    assert_eq!(h.controller.tracked_pids(), vec![VIBER]);

    h.kill(VIBER);
    h.poll(2);
    assert!(h.controller.tracked_pids().is_empty());
    assert!(h.calls().is_empty());
}

#[test]
fn test_stop_after_exit_is_idempotent() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.spawn(WHATSAPP, "WhatsApp.exe");
    h.audio(VIBER, 0.2, true);
    h.audio(WHATSAPP, 0.2, true);
    h.poll(0);
    h.poll(2);
    assert_eq!(h.controller.active_mixed_count(), 2);

    h.kill(VIBER);
    h.poll(4);
    assert_eq!(h.controller.active_mixed_count(), 1);

    assert_eq!(h.controller.force_stop(), 1);
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(h.controller.force_stop(), 0);
    assert_eq!(h.controller.active_mixed_count(), 0);

    assert_eq!(h.count(&EngineCall::Stop(VIBER)), 1);
    assert_eq!(h.count(&EngineCall::Stop(WHATSAPP)), 1);
    assert_eq!(h.count(&EngineCall::DisableMixed), 1);
    h.assert_mixed_alternates();
}

#[test]
fn test_mixed_enable_failure_falls_back_to_direct_capture() {
    let mut h = Harness::new();
    h.engine.lock().unwrap().fail_mixed = true;
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    assert_eq!(
        h.calls(),
        vec![
            EngineCall::StartProcess {
                id: VIBER,
                monitor_only: true
            },
            EngineCall::StartDevice { id: FIRST_MIC },
            EngineCall::EnableMixed,
            EngineCall::Stop(VIBER),
            EngineCall::Stop(FIRST_MIC),
            EngineCall::StartProcess {
                id: VIBER,
                monitor_only: false
            },
        ]
    );
    let call = h.controller.call(VIBER).unwrap();
    assert!(!call.mixed_enabled);
    assert_eq!(call.mic_source_id, None);
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(h.controller.mixed_path(), None);
    h.assert_reported_paths_written();

    h.clear_calls();
    assert_eq!(h.controller.force_stop(), 1);
    assert_eq!(h.calls(), vec![EngineCall::Stop(VIBER)]);
}

#[test]
fn test_mic_failure_records_callee_only() {
    let mut h = Harness::new();
    h.engine.lock().unwrap().fail_mic_start = true;
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    let call = h.controller.call(VIBER).unwrap();
    assert_eq!(call.mic_source_id, None);
    assert!(call.mixed_enabled);
    assert_eq!(h.count(&EngineCall::EnableMixed), 1);
}

#[test]
fn test_missing_microphone_records_callee_only() {
    let mut h = Harness::new();
    h.engine.lock().unwrap().microphone = None;
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    let call = h.controller.call(VIBER).unwrap();
    assert_eq!(call.mic_source_id, None);
    assert!(h
        .calls()
        .iter()
        .all(|c| !matches!(c, EngineCall::StartDevice { .. })));
}

#[test]
fn test_process_capture_failure_stays_idle_and_retries() {
    let mut h = Harness::new();
    h.engine.lock().unwrap().fail_process_start = true;
    h.spawn(VIBER, "Viber.exe");
    h.audio(VIBER, 0.2, true);
    h.poll(0);
    h.poll(2);

    assert!(!h.controller.is_recording(VIBER));
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(
        h.calls(),
        vec![EngineCall::StartProcess {
            id: VIBER,
            monitor_only: true
        }]
    );

    h.engine.lock().unwrap().fail_process_start = false;
    h.poll(4);
    h.poll(6);
    assert!(h.controller.is_recording(VIBER));
}

#[test]
fn test_session_query_failure_keeps_recording() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    h.world.lock().unwrap().fail_sessions = true;
    for t in (70..80).step_by(2) {
        h.poll(t);
    }
    assert!(h.controller.is_recording(VIBER));
    assert_eq!(h.controller.counters(VIBER).unwrap().inactive, 0);
}

#[test]
fn test_locator_failure_skips_cycle() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    h.world.lock().unwrap().fail_locator = true;
    let now = h.at(10);
    assert!(h.controller.poll_cycle(&h.config, now).is_err());
    assert!(h.controller.is_recording(VIBER));
    assert_eq!(h.controller.tracked_pids(), vec![VIBER]);
}

#[test]
fn test_force_start_skips_hysteresis_and_recording_subjects() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.spawn(WHATSAPP, "WhatsApp.exe");

    let now = h.at(0);
    assert_eq!(h.controller.force_start(&h.config, now).unwrap(), Some(VIBER));
    assert!(h.controller.is_recording(VIBER));
    assert!(!h.controller.is_recording(WHATSAPP));

    assert_eq!(
        h.controller.force_start(&h.config, now).unwrap(),
        Some(WHATSAPP)
    );
    assert_eq!(h.controller.force_start(&h.config, now).unwrap(), None);
    assert_eq!(h.controller.recording_count(), 2);
    assert_eq!(h.count(&EngineCall::EnableMixed), 1);
    assert_eq!(h.status.active_count(), 2);
}

#[test]
fn test_force_start_with_no_subjects() {
    let mut h = Harness::new();
    let now = h.at(0);
    assert_eq!(h.controller.force_start(&h.config, now).unwrap(), None);
    assert!(h.calls().is_empty());
}

#[test]
fn test_force_stop_ignores_min_duration_and_clears_state() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    assert_eq!(h.controller.force_stop(), 1);
    assert!(h.controller.tracked_pids().is_empty());
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert_eq!(h.status.active_count(), 0);
    assert!(h.status.recordings().is_empty());

    // Still loud, so the subject is picked up again from scratch.
    h.poll(4);
    assert_eq!(h.controller.counters(VIBER).unwrap().start, 1);
}

#[test]
fn test_status_snapshot_tracks_recordings() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    start_call(&mut h, VIBER);

    let recordings = h.status.recordings();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].pid, VIBER);
    assert_eq!(recordings[0].process_name, "Viber.exe");
    assert!(recordings[0].mixed_enabled);
    assert!(recordings[0]
        .output_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .contains("Viber"));
    assert_eq!(h.status.active_count(), 1);
}

#[test]
fn test_shutdown_stops_everything() {
    let mut h = Harness::new();
    h.spawn(VIBER, "Viber.exe");
    h.spawn(WHATSAPP, "WhatsApp.exe");
    h.audio(VIBER, 0.2, true);
    h.audio(WHATSAPP, 0.2, true);
    h.poll(0);
    h.poll(2);
    h.clear_calls();

    h.controller.shutdown();

    let calls = h.calls();
    assert_eq!(calls.last(), Some(&EngineCall::StopAll));
    assert_eq!(h.count(&EngineCall::DisableMixed), 1);
    assert_eq!(h.count(&EngineCall::Stop(VIBER)), 1);
    assert_eq!(h.count(&EngineCall::Stop(WHATSAPP)), 1);
    assert_eq!(h.controller.active_mixed_count(), 0);
    assert!(h.status.recordings().is_empty());
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn test_runner_force_start_and_shutdown() {
    let recordings = tempfile::tempdir().unwrap();
    let world = common::SharedWorld::default();
    world
        .lock()
        .unwrap()
        .processes
        .push((VIBER, "Viber.exe".to_string()));
    let engine = common::SharedEngine::new(Mutex::new(common::EngineScript::default()));
    let status = StatusHandle::default();
    let flags = ControlFlags::default();
    let mut config = common::test_config(recordings.path());
    config.monitoring.poll_interval_seconds = 30;
    let config = ConfigHandle::new(config, PathBuf::from("unused.toml"));

    let handle = {
        let (world, engine, status) = (world.clone(), engine.clone(), status.clone());
        runner::spawn(
            move || common::build_controller(&world, &engine, status),
            config,
            flags.clone(),
        )
        .unwrap()
    };

    flags.request_force_start();
    assert!(wait_for(Duration::from_secs(5), || status.active_count() == 1));

    flags.request_shutdown();
    handle.join().unwrap();

    assert_eq!(status.active_count(), 0);
    let calls = engine.lock().unwrap().calls.clone();
    assert_eq!(calls.last(), Some(&EngineCall::StopAll));
    assert!(calls.contains(&EngineCall::Stop(VIBER)));
}

struct PanicOnce {
    inner: common::FakeLocator,
    panicked: Arc<Mutex<bool>>,
}

impl SubjectLocator for PanicOnce {
    fn snapshot(&mut self) -> Result<ProcessTable, LocatorError> {
        let mut panicked = self.panicked.lock().unwrap();
        if !*panicked {
            *panicked = true;
            drop(panicked);
            panic!("enumeration blew up");
        }
        drop(panicked);
        self.inner.snapshot()
    }
}

#[test]
fn test_runner_survives_panicking_cycle() {
    let recordings = tempfile::tempdir().unwrap();
    let world = common::SharedWorld::default();
    world
        .lock()
        .unwrap()
        .processes
        .push((VIBER, "Viber.exe".to_string()));
    let engine = common::SharedEngine::new(Mutex::new(common::EngineScript::default()));
    let status = StatusHandle::default();
    let flags = ControlFlags::default();
    let mut config = common::test_config(recordings.path());
    config.monitoring.poll_interval_seconds = 30;
    let config = ConfigHandle::new(config, PathBuf::from("unused.toml"));
    let panicked = Arc::new(Mutex::new(false));

    let handle = {
        let (world, engine, status, panicked) =
            (world.clone(), engine.clone(), status.clone(), panicked.clone());
        runner::spawn(
            move || {
                callwatch::monitor::CallController::new(
                    callwatch::monitor::Collaborators {
                        locator: Box::new(PanicOnce {
                            inner: common::FakeLocator(world.clone()),
                            panicked,
                        }),
                        sessions: callwatch::audio::SessionDirectory::new(
                            Box::new(common::FakeSessions(world.clone())),
                            0,
                        ),
                        windows: Box::new(common::FakeWindows(world)),
                        capture: Box::new(common::FakeEngine(engine)),
                    },
                    status,
                    "Test User".to_string(),
                )
            },
            config,
            flags.clone(),
        )
        .unwrap()
    };

    assert!(wait_for(Duration::from_secs(5), || *panicked.lock().unwrap()));
    flags.request_force_start();
    assert!(wait_for(Duration::from_secs(5), || status.active_count() == 1));

    flags.request_shutdown();
    handle.join().unwrap();
    assert_eq!(status.active_count(), 0);
}
