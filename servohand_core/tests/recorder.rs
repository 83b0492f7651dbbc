use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::rstest;
use servohand_core::mocks::ScriptedHand;
use servohand_core::{
    ActuatorManager, BatchDelays, FrameSettings, HandError, ManagerCfg, MotionProfile,
    MotionRecorder, RecorderCfg, Recording, RecordingFrame, RecordingMode, ServoMap,
};
use servohand_hardware::simulated_hand;
use servohand_traits::{ManualClock, MonotonicClock};

fn reading(pairs: &[(u8, Option<i32>)]) -> ServoMap<Option<i32>> {
    pairs.iter().copied().collect()
}

fn recorder(hand: Arc<ScriptedHand>, save_dir: &std::path::Path) -> MotionRecorder {
    let cfg = RecorderCfg {
        save_dir: save_dir.to_path_buf(),
        ..RecorderCfg::default()
    };
    MotionRecorder::new(hand, Arc::new(ManualClock::new()), cfg)
}

fn write_recording(dir: &std::path::Path, mode: RecordingMode, frames: &[(f64, &[(u8, i32)])]) -> std::path::PathBuf {
    let mut rec = Recording::new(mode, 20);
    for (t, pairs) in frames {
        rec.frames.push(RecordingFrame {
            timestamp: *t,
            positions: pairs.iter().copied().collect(),
        });
    }
    let path = dir.join(format!("{}.json", mode));
    rec.save(&path).unwrap();
    path
}

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    f()
}

#[rstest]
fn frame_mode_captures_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let hand = Arc::new(ScriptedHand::new());
    hand.push_reading(reading(&[(1, Some(10)), (2, None)]));
    hand.push_reading(reading(&[(1, Some(20)), (2, Some(5))]));
    let rec = recorder(hand, dir.path());

    assert!(matches!(rec.add_frame(), Err(HandError::State(_))));
    rec.start_recording(Some(RecordingMode::Frame)).unwrap();
    assert!(rec.is_recording());
    assert_eq!(rec.add_frame().unwrap(), 1);
    assert_eq!(rec.add_frame().unwrap(), 2);
    assert_eq!(rec.stop_recording(), 2);
    assert!(!rec.is_recording());
    assert_eq!(rec.stop_recording(), 0);

    let r = rec.recording();
    assert_eq!(r.mode, RecordingMode::Frame);
    assert_eq!(r.frames[0].positions.len(), 1);
    assert_eq!(r.frames[0].positions[&1], 10);
    assert_eq!(r.frames[1].positions[&2], 5);
}

#[rstest]
fn add_frame_is_refused_in_realtime_mode() {
    let dir = tempfile::tempdir().unwrap();
    let hand = Arc::new(ScriptedHand::new());
    hand.push_reading(reading(&[(1, Some(0))]));
    let rec = recorder(hand, dir.path());
    rec.start_recording(Some(RecordingMode::Realtime)).unwrap();
    assert!(matches!(rec.add_frame(), Err(HandError::State(_))));
    rec.stop_recording();
}

#[rstest]
fn realtime_mode_samples_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let hand = Arc::new(ScriptedHand::new());
    hand.push_reading(reading(&[(1, Some(1)), (4, Some(-4))]));
    let rec = recorder(hand, dir.path());
    rec.start_recording(None).unwrap();
    assert!(wait_until(Duration::from_secs(5), || rec.frame_count() >= 5));
    let n = rec.stop_recording();
    assert!(n >= 5);

    let r = rec.recording();
    assert_eq!(r.mode, RecordingMode::Realtime);
    assert_eq!(r.freq, 20);
    assert!(r.frames[0].timestamp.abs() < 1e-9);
    assert!(r.frames.windows(2).all(|w| w[1].timestamp >= w[0].timestamp));
    assert_eq!(r.frames[0].positions[&4], -4);
}

#[rstest]
fn save_requires_frames_and_auto_names_files() {
    let dir = tempfile::tempdir().unwrap();
    let hand = Arc::new(ScriptedHand::new());
    hand.push_reading(reading(&[(3, Some(33))]));
    let rec = recorder(hand, dir.path());
    assert!(rec.save_recording(None).is_err());

    rec.start_recording(Some(RecordingMode::Frame)).unwrap();
    rec.add_frame().unwrap();
    rec.stop_recording();
    let path = rec.save_recording(None).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("recording_frame_"), "{name}");
    assert!(name.ends_with(".json"));
    assert_eq!(path.parent(), Some(dir.path()));

    let loaded = Recording::load(&path).unwrap();
    assert_eq!(loaded.mode, RecordingMode::Frame);
    assert_eq!(loaded.frames, rec.recording().frames);
}

#[rstest]
fn realtime_playback_interpolates_monotonically() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(
        dir.path(),
        RecordingMode::Realtime,
        &[(0.0, &[(1, 0)]), (1.0, &[(1, 1000)])],
    );
    let hand = Arc::new(ScriptedHand::new());
    let rec = recorder(hand.clone(), dir.path());
    let summary = rec.select_file(&path).unwrap();
    assert_eq!(summary.frame_count, 2);

    rec.start_playback(1, 1.0, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));

    let sent = hand.sent();
    // first frame, 20 interpolated steps, final approach
    assert_eq!(sent.len(), 22);
    assert_eq!(hand.torque_calls(), 1);
    let positions: Vec<i32> = sent.iter().map(|c| *c.targets.get(1).unwrap()).collect();
    assert_eq!(positions[0], 0);
    assert!(positions[1..21].windows(2).all(|w| w[1] > w[0]), "{positions:?}");
    assert_eq!(positions[20], 1000);
    assert_eq!(positions[21], 1000);
    assert_eq!(sent[1].profile, MotionProfile::new(1000, 0, 700));
    assert_eq!(sent[21].profile, MotionProfile::new(500, 50, 700));
}

#[rstest]
fn playback_repeats_and_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(
        dir.path(),
        RecordingMode::Realtime,
        &[(0.0, &[(1, 0)]), (0.1, &[(1, 100)])],
    );
    let hand = Arc::new(ScriptedHand::new());
    let rec = recorder(hand.clone(), dir.path());
    rec.select_file(&path).unwrap();
    rec.start_playback(3, 1.0, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));
    assert_eq!(rec.current_repeat(), 0);
    // per repeat: first frame, 2 steps, final frame
    assert_eq!(hand.sent().len(), 3 * 4);
}

#[rstest]
fn single_frame_realtime_recording_sends_once_per_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(dir.path(), RecordingMode::Realtime, &[(0.0, &[(2, 7)])]);
    let hand = Arc::new(ScriptedHand::new());
    let rec = recorder(hand.clone(), dir.path());
    rec.select_file(&path).unwrap();
    rec.start_playback(2, 1.0, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));
    assert_eq!(hand.sent().len(), 2);
}

#[rstest]
fn frame_playback_uses_frame_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(
        dir.path(),
        RecordingMode::Frame,
        &[(0.0, &[(1, 5)]), (3.0, &[(1, 50)]), (9.0, &[(1, -5)])],
    );
    let hand = Arc::new(ScriptedHand::new());
    let rec = recorder(hand.clone(), dir.path());
    rec.select_file(&path).unwrap();
    rec.set_frame_playback_settings(FrameSettings {
        speed: 300,
        acceleration: 10,
        torque: 400,
        interval: Duration::from_millis(200),
    });
    rec.start_playback(1, 1.0, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));

    let sent = hand.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|c| c.profile == MotionProfile::new(300, 10, 400)));
    assert_eq!(sent[2].targets.get(1), Some(&-5));
}

#[rstest]
#[case(1.0, 1000)]
#[case(2.0, 500)]
#[case(0.5, 2000)]
fn playback_speed_scales_realtime_duration(#[case] speed: f64, #[case] expected_ms: u64) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(
        dir.path(),
        RecordingMode::Realtime,
        &[(0.0, &[(1, 0)]), (1.0, &[(1, 1000)])],
    );
    let hand = Arc::new(ScriptedHand::new());
    let clock = ManualClock::new();
    let cfg = RecorderCfg {
        save_dir: dir.path().to_path_buf(),
        ..RecorderCfg::default()
    };
    let rec = MotionRecorder::new(hand.clone(), Arc::new(clock.clone()), cfg);
    rec.select_file(&path).unwrap();
    rec.start_playback(1, speed, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));

    let elapsed = clock.elapsed();
    let expected = Duration::from_millis(expected_ms);
    assert!(
        elapsed.abs_diff(expected) < Duration::from_millis(1),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
    // same interpolation steps at any speed
    assert_eq!(hand.sent().len(), 22);
}

#[rstest]
#[case(0.0)]
#[case(-2.0)]
#[case(f64::NAN)]
#[case(100.0)]
fn playback_rejects_unusable_speed(#[case] speed: f64) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(dir.path(), RecordingMode::Realtime, &[(0.0, &[(1, 0)])]);
    let hand = Arc::new(ScriptedHand::new());
    let rec = recorder(hand.clone(), dir.path());
    rec.select_file(&path).unwrap();
    assert!(matches!(
        rec.start_playback(1, speed, None),
        Err(HandError::Validation(_))
    ));
    assert!(!rec.is_playing());
    assert!(hand.sent().is_empty());
}

#[rstest]
fn frame_settings_passed_to_playback_apply_to_that_run_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(
        dir.path(),
        RecordingMode::Frame,
        &[(0.0, &[(1, 5)]), (3.0, &[(1, 50)])],
    );
    let hand = Arc::new(ScriptedHand::new());
    let rec = recorder(hand.clone(), dir.path());
    rec.select_file(&path).unwrap();
    let stored = rec.frame_playback_settings();
    let once = FrameSettings {
        speed: 120,
        acceleration: 3,
        torque: 250,
        interval: Duration::from_millis(50),
    };
    rec.start_playback(1, 1.0, Some(once)).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));
    assert!(hand.sent().iter().all(|c| c.profile == MotionProfile::new(120, 3, 250)));
    assert_eq!(rec.frame_playback_settings(), stored);

    let before = hand.sent().len();
    rec.start_playback(1, 1.0, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));
    let sent = hand.sent();
    assert_eq!(sent.len(), before + 2);
    assert!(sent[before..].iter().all(|c| c.profile == stored.profile()));
}

#[rstest]
fn recording_and_playback_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(
        dir.path(),
        RecordingMode::Frame,
        &[(0.0, &[(1, 5)]), (1.0, &[(1, 6)])],
    );
    let hand = Arc::new(ScriptedHand::new());
    hand.push_reading(reading(&[(1, Some(0))]));
    let cfg = RecorderCfg {
        save_dir: dir.path().to_path_buf(),
        ..RecorderCfg::default()
    };
    let rec = MotionRecorder::new(hand.clone(), Arc::new(MonotonicClock::new()), cfg);

    rec.start_recording(Some(RecordingMode::Frame)).unwrap();
    assert!(matches!(rec.start_playback(1, 1.0, None), Err(HandError::State(_))));
    assert!(rec.select_file(&path).is_err());
    assert!(matches!(rec.start_recording(None), Err(HandError::State(_))));
    rec.stop_recording();

    rec.select_file(&path).unwrap();
    rec.set_frame_playback_settings(FrameSettings {
        interval: Duration::from_secs(30),
        ..FrameSettings::default()
    });
    rec.start_playback(1, 1.0, None).unwrap();
    assert!(rec.is_playing());
    assert!(wait_until(Duration::from_secs(2), || rec.current_repeat() == 1));
    assert!(matches!(rec.start_recording(None), Err(HandError::State(_))));
    assert!(matches!(rec.start_playback(1, 1.0, None), Err(HandError::State(_))));

    let t0 = Instant::now();
    assert!(rec.stop_playback());
    assert!(t0.elapsed() < Duration::from_secs(2));
    assert!(!rec.is_playing());
    rec.start_recording(None).unwrap();
    rec.stop_recording();
}

#[rstest]
fn playback_needs_frames_and_positive_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let rec = recorder(Arc::new(ScriptedHand::new()), dir.path());
    assert!(matches!(rec.start_playback(0, 1.0, None), Err(HandError::Validation(_))));
    assert!(matches!(rec.start_playback(1, 1.0, None), Err(HandError::State(_))));
    assert!(!rec.stop_playback());
}

#[rstest]
fn recorder_drives_a_simulated_hand() {
    let dir = tempfile::tempdir().unwrap();
    let (bus, handle) = simulated_hand();
    let manager = Arc::new(
        ActuatorManager::builder()
            .with_transport(bus)
            .with_clock(Arc::new(ManualClock::new()))
            .with_config(ManagerCfg {
                delays: BatchDelays::none(),
                ..ManagerCfg::default()
            })
            .build()
            .unwrap(),
    );
    manager.ping_all();
    let path = write_recording(
        dir.path(),
        RecordingMode::Realtime,
        &[(0.0, &[(1, 0), (2, 0)]), (0.2, &[(1, 400), (2, -400)])],
    );
    let rec = MotionRecorder::for_manager(manager.clone(), RecorderCfg::default());
    rec.select_file(&path).unwrap();
    rec.start_playback(1, 1.0, None).unwrap();
    assert!(rec.wait_playback(Duration::from_secs(5)));
    assert_eq!(handle.present_position(1), Some(400));
    assert_eq!(handle.present_position(2), Some(-400));
    assert!(manager.get_servo(1).unwrap().is_torque_enabled());
}
