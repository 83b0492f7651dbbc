use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rstest::rstest;
use servohand_core::error::BuildError;
use servohand_core::monitor::{FeedbackSnapshot, ObserverError};
use servohand_core::registers::{ACCELERATION, GOAL_POSITION, GOAL_SPEED, GOAL_TORQUE};
use servohand_core::{
    ActuatorManager, BatchDelays, HandError, Limits, ManagerCfg, MotionProfile, ServoCfg, ServoMap,
};
use servohand_hardware::{SimHandle, simulated_hand};
use servohand_traits::{ManualClock, MonotonicClock};

fn quick_cfg() -> ManagerCfg {
    ManagerCfg {
        delays: BatchDelays::none(),
        ..ManagerCfg::default()
    }
}

fn hand_with(cfg: ManagerCfg) -> (ActuatorManager, SimHandle) {
    let (bus, handle) = simulated_hand();
    let manager = ActuatorManager::builder()
        .with_transport(bus)
        .with_clock(Arc::new(ManualClock::new()))
        .with_config(cfg)
        .build()
        .expect("build manager");
    (manager, handle)
}

// Timed windows need real time so the sampler gets to run inside them.
fn hand_on_wall_clock(cfg: ManagerCfg) -> (ActuatorManager, SimHandle) {
    let (bus, handle) = simulated_hand();
    let manager = ActuatorManager::builder()
        .with_transport(bus)
        .with_clock(Arc::new(MonotonicClock::new()))
        .with_config(cfg)
        .build()
        .expect("build manager");
    (manager, handle)
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
fn builder_without_transport_is_a_typed_error() {
    let err = ActuatorManager::builder()
        .try_build()
        .expect_err("should fail with MissingTransport");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingTransport) => {}
        other => panic!("expected MissingTransport, got: {other:?}"),
    }
}

#[rstest]
fn builder_rejects_bad_servo_config() {
    let (bus, _handle) = simulated_hand();
    let cfg = ManagerCfg {
        servos: vec![(
            2,
            ServoCfg {
                min_position: 10,
                max_position: -10,
                invert: false,
            },
        )],
        ..ManagerCfg::default()
    };
    let err = ActuatorManager::builder()
        .with_transport(bus)
        .with_config(cfg)
        .build()
        .expect_err("inverted range");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[rstest]
fn ping_all_reports_every_id() {
    let (hand, handle) = hand_with(quick_cfg());
    handle.set_online(5, false);
    let result = hand.ping_all();
    assert_eq!(result.len(), 17);
    assert_eq!(result.get(5), Some(&false));
    assert_eq!(result.values().filter(|ok| **ok).count(), 16);
    assert!(!hand.connected_ids().contains(&5));
}

#[rstest]
fn disconnected_servo_gets_no_traffic() {
    let (hand, handle) = hand_with(quick_cfg());
    handle.set_online(5, false);
    hand.ping_all();
    let before = handle.packets_to(5);

    let targets: ServoMap<i32> = [(5, 100)].into_iter().collect();
    let result = hand.set_all_positions(&targets, &MotionProfile::default());

    let expected: ServoMap<bool> = [(5, false)].into_iter().collect();
    assert_eq!(result, expected);
    assert_eq!(handle.packets_to(5), before);
}

#[rstest]
fn sync_write_skips_disconnected_servo() {
    let cfg = ManagerCfg {
        sync_write: true,
        ..quick_cfg()
    };
    let (hand, handle) = hand_with(cfg);
    handle.set_online(5, false);
    hand.ping_all();
    hand.torque_on_all();
    let to_5 = handle.packets_to(5);
    let to_1 = handle.packets_to(1);
    let to_2 = handle.packets_to(2);
    let writes = handle.write_calls();

    let targets: ServoMap<i32> = [(5, 12000), (1, 100), (2, -200)].into_iter().collect();
    let result = hand.set_all_positions(&targets, &MotionProfile::new(500, 50, 700));

    let expected: ServoMap<bool> = [(1, true), (2, true), (5, false)].into_iter().collect();
    assert_eq!(result, expected);
    assert_eq!(handle.packets_to(5), to_5);
    // one batched packet carrying both live servos
    assert_eq!(handle.write_calls(), writes + 1);
    assert_eq!(handle.packets_to(1), to_1 + 1);
    assert_eq!(handle.packets_to(2), to_2 + 1);
    assert_eq!(handle.register_word(1, GOAL_POSITION.address), Some(100));
    assert_eq!(handle.register_word(2, GOAL_POSITION.address), Some(-200));
    assert_eq!(handle.register_word(5, GOAL_POSITION.address), Some(0));
}

#[rstest]
fn unknown_id_reports_false() {
    let (hand, _handle) = hand_with(quick_cfg());
    hand.ping_all();
    let mut targets = ServoMap::new();
    targets.insert(1, 10);
    let result = hand.set_all_positions(&targets, &MotionProfile::default());
    assert_eq!(result.get(1), Some(&true));
    assert!(hand.get_servo(18).is_none());
    assert!(hand.get_servo_limits(0).is_none());
}

#[rstest]
fn set_all_positions_writes_profile_then_position() {
    let (hand, handle) = hand_with(quick_cfg());
    hand.ping_all();
    hand.torque_on_all();
    let targets: ServoMap<i32> = [(1, 500), (2, -500)].into_iter().collect();
    let result = hand.set_all_positions(&targets, &MotionProfile::new(800, 30, 600));
    assert_eq!(result.get(1), Some(&true));
    assert_eq!(result.get(2), Some(&true));
    assert_eq!(handle.register_word(1, GOAL_SPEED.address), Some(800));
    assert_eq!(handle.register_byte(1, ACCELERATION.address), Some(30));
    assert_eq!(handle.register_word(1, GOAL_TORQUE.address), Some(600));
    assert_eq!(handle.present_position(2), Some(-500));

    let state = hand.get_servo(1).unwrap().state();
    assert_eq!(state.position, Some(500));
    assert_eq!(state.speed, Some(800));
}

#[rstest]
fn sync_write_sends_one_packet_for_all_servos() {
    let cfg = ManagerCfg {
        sync_write: true,
        ..quick_cfg()
    };
    let (hand, handle) = hand_with(cfg);
    hand.ping_all();
    hand.torque_on_all();
    let writes_before = handle.write_calls();

    let targets: ServoMap<i32> = (1..=17).map(|id| (id, i32::from(id) * 10)).collect();
    let result = hand.set_all_positions(&targets, &MotionProfile::new(1000, 0, 700));
    assert!(result.values().all(|ok| *ok));
    assert_eq!(handle.write_calls(), writes_before + 1);
    assert_eq!(handle.register_word(17, GOAL_POSITION.address), Some(170));
    assert_eq!(hand.get_servo(9).unwrap().state().position, Some(90));
}

#[rstest]
fn failed_sync_write_falls_back_to_per_servo_writes() {
    let cfg = ManagerCfg {
        sync_write: true,
        ..quick_cfg()
    };
    let (hand, handle) = hand_with(cfg);
    hand.ping_all();
    handle.fail_next_writes(3);
    let targets: ServoMap<i32> = [(1, 11), (2, 22)].into_iter().collect();
    let result = hand.set_all_positions(&targets, &MotionProfile::new(100, 10, 500));
    assert_eq!(result.get(1), Some(&true));
    assert_eq!(result.get(2), Some(&true));
    assert_eq!(handle.register_word(2, GOAL_POSITION.address), Some(22));
}

#[rstest]
fn read_all_positions_marks_failures_and_omits_disconnected() {
    let (hand, handle) = hand_with(quick_cfg());
    handle.set_online(7, false);
    hand.ping_all();
    handle.set_present_position(1, 321);
    handle.set_online(2, false);

    let positions = hand.read_all_positions();
    assert_eq!(positions.len(), 16);
    assert_eq!(positions.get(1), Some(&Some(321)));
    assert_eq!(positions.get(2), Some(&None));
    assert!(!positions.contains(7));
}

#[rstest]
fn torque_batches_cover_connected_servos() {
    let (hand, handle) = hand_with(quick_cfg());
    handle.set_online(3, false);
    hand.ping_all();
    let on = hand.torque_on_all();
    assert_eq!(on.len(), 16);
    assert!(on.values().all(|ok| *ok));
    assert!(hand.get_servo(1).unwrap().is_torque_enabled());
    let off = hand.torque_off_all();
    assert_eq!(off.len(), 16);
    assert!(!hand.get_servo(1).unwrap().is_torque_enabled());
    assert!(hand.damping_all().values().all(|ok| *ok));
}

#[rstest]
fn calibration_observes_min_and_max() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("limits.json");
    let (bus, handle) = simulated_hand();
    let hand = ActuatorManager::builder()
        .with_transport(bus)
        .with_clock(Arc::new(ManualClock::new()))
        .with_config(quick_cfg())
        .with_calibration_file(&file)
        .build()
        .unwrap();
    assert!(!hand.has_calibration_data());
    hand.ping_all();
    handle.script_positions(3, [100, -50, 300, 20]);

    hand.start_calibration().unwrap();
    assert!(hand.is_calibrating());
    assert!(matches!(hand.start_calibration(), Err(HandError::State(_))));
    assert!(wait_until(Duration::from_secs(5), || {
        handle.present_position(3) == Some(20)
    }));
    let limits = hand.stop_calibration().unwrap();
    assert!(!hand.is_calibrating());

    assert_eq!(limits.get(3), Some(&Limits { min: -50, max: 300 }));
    assert_eq!(hand.get_servo_limits(3), Some(Limits { min: -50, max: 300 }));
    assert!(hand.has_calibration_data());

    // A fresh manager picks the persisted limits up at construction.
    let (bus, _h) = simulated_hand();
    let again = ActuatorManager::builder()
        .with_transport(bus)
        .with_config(quick_cfg())
        .with_calibration_file(&file)
        .build()
        .unwrap();
    assert_eq!(again.get_servo_limits(3), Some(Limits { min: -50, max: 300 }));
    assert_eq!(again.get_servo_limits(4), Some(Limits { min: 0, max: 0 }));
}

#[rstest]
fn calibration_releases_torque_first() {
    let (hand, handle) = hand_with(quick_cfg());
    hand.ping_all();
    hand.torque_on_all();
    hand.start_calibration().unwrap();
    assert!(!hand.get_servo(1).unwrap().is_torque_enabled());
    assert_eq!(handle.register_byte(1, 40), Some(0));
    assert!(matches!(hand.start_calibration(), Err(HandError::State(_))));
    assert!(hand.is_calibrating());
    hand.stop_calibration().unwrap();
}

#[rstest]
fn stop_calibration_without_start_is_a_state_error() {
    let (hand, _handle) = hand_with(quick_cfg());
    assert!(matches!(hand.stop_calibration(), Err(HandError::State(_))));
}

#[rstest]
fn timed_calibration_runs_to_completion() {
    let (hand, handle) = hand_on_wall_clock(quick_cfg());
    hand.ping_all();
    handle.set_present_position(8, -42);
    let limits = hand.calibrate_for(Duration::from_millis(300)).unwrap();
    assert!(!hand.is_calibrating());
    assert_eq!(limits.get(8), Some(&Limits { min: -42, max: -42 }));
    assert_eq!(
        hand.get_servo_limits(8),
        Some(Limits { min: -42, max: -42 })
    );
}

#[rstest]
fn monitor_feeds_observers_and_contains_failures() {
    let (hand, handle) = hand_with(quick_cfg());
    handle.set_online(5, false);
    hand.ping_all();

    let seen = Arc::new(AtomicUsize::new(0));
    let last: Arc<Mutex<Option<FeedbackSnapshot>>> = Arc::new(Mutex::new(None));
    hand.add_monitor_observer(|_: &FeedbackSnapshot| -> Result<(), ObserverError> {
        Err("observer failure".into())
    });
    let (s, l) = (seen.clone(), last.clone());
    hand.add_monitor_observer(move |snap: &FeedbackSnapshot| -> Result<(), ObserverError> {
        s.fetch_add(1, Ordering::Relaxed);
        *l.lock() = Some(snap.clone());
        Ok(())
    });

    hand.start_monitoring(Some(Duration::from_millis(20))).unwrap();
    assert!(hand.is_monitoring());
    assert!(matches!(
        hand.start_monitoring(None),
        Err(HandError::State(_))
    ));
    assert!(wait_until(Duration::from_secs(5), || seen.load(Ordering::Relaxed) >= 2));
    assert!(hand.stop_monitoring());
    assert!(!hand.is_monitoring());
    assert!(!hand.stop_monitoring());

    let snap = last.lock().clone().unwrap();
    assert_eq!(snap.len(), 16);
    assert!(!snap.contains(5));
    assert!(snap.get(1).unwrap().is_some());
}
