//! Replaying a [`Recording`] on the hand.
//!
//! Realtime recordings are replayed with linear interpolation between
//! consecutive frames so the hand moves smoothly at the recording rate.
//! Each segment is paced against its own start time, so time spent on the
//! bus does not accumulate as drift. Frame recordings step through poses
//! with a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use servohand_traits::Clock;
use tracing::{debug, info, warn};

use crate::config::{FrameSettings, MotionProfile, PlaybackCfg};
use crate::error::HandError;
use crate::manager::HandControl;
use crate::recording::{Recording, RecordingFrame, RecordingMode};
use crate::servo_map::ServoMap;
use crate::worker::StopToken;

/// Fastest allowed time scale for realtime playback.
pub const MAX_PLAYBACK_SPEED: f64 = 5.0;

/// Interpolation steps for a gap of `gap_s` seconds at `freq` Hz; at least one.
pub fn step_count(gap_s: f64, freq: u32) -> u32 {
    let steps = (gap_s.max(0.0) * f64::from(freq.max(1))).ceil();
    if steps.is_finite() && steps >= 1.0 {
        steps.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// Linear blend of two frames over the servos present in both, rounded to
/// the nearest count.
pub fn interpolate(a: &RecordingFrame, b: &RecordingFrame, fraction: f64) -> ServoMap<i32> {
    let t = fraction.clamp(0.0, 1.0);
    a.positions
        .iter()
        .filter_map(|(id, &pa)| {
            let pb = *b.positions.get(id)?;
            let v = f64::from(pa) + f64::from(pb - pa) * t;
            Some((*id, v.round() as i32))
        })
        .collect()
}

/// Check a repeat count and speed before any playback state is touched.
pub fn validate_request(repeat_count: u32, speed: f64) -> Result<(), HandError> {
    if repeat_count == 0 {
        return Err(HandError::Validation("repeat count must be >= 1".into()));
    }
    if !speed.is_finite() || speed <= 0.0 || speed > MAX_PLAYBACK_SPEED {
        return Err(HandError::Validation(format!(
            "playback speed must be in (0, {MAX_PLAYBACK_SPEED}], got {speed}"
        )));
    }
    Ok(())
}

/// Everything a playback run needs, fixed when playback starts.
#[derive(Debug, Clone)]
pub struct PlaybackPlan {
    pub recording: Arc<Recording>,
    pub repeat_count: u32,
    /// Time scale for realtime recordings; 2.0 replays twice as fast.
    pub speed: f64,
    pub frame: FrameSettings,
    pub realtime: MotionProfile,
    pub final_approach: MotionProfile,
    pub repeat_pause: Duration,
}

impl PlaybackPlan {
    pub fn new(
        recording: Arc<Recording>,
        repeat_count: u32,
        speed: f64,
        cfg: &PlaybackCfg,
    ) -> Result<Self, HandError> {
        validate_request(repeat_count, speed)?;
        Ok(Self {
            recording,
            repeat_count,
            speed,
            frame: cfg.frame.clone(),
            realtime: cfg.realtime,
            final_approach: cfg.final_approach,
            repeat_pause: cfg.repeat_pause,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Stopped,
    /// The bus went away mid-run.
    Aborted,
}

/// Drive `hand` through `plan`. `progress` holds the 1-based repeat being
/// played (0 before the first).
pub fn run(
    hand: &dyn HandControl,
    clock: &dyn Clock,
    plan: &PlaybackPlan,
    stop: &StopToken,
    progress: &AtomicU32,
) -> Outcome {
    let rec = &plan.recording;
    if rec.frames.is_empty() {
        return Outcome::Completed;
    }
    hand.enable_torque();
    info!(
        mode = %rec.mode,
        frames = rec.frames.len(),
        repeats = plan.repeat_count,
        speed = plan.speed,
        "playback started"
    );

    for repeat in 0..plan.repeat_count {
        progress.store(repeat + 1, Ordering::Relaxed);
        let outcome = match rec.mode {
            RecordingMode::Realtime => play_realtime(hand, clock, plan, stop),
            RecordingMode::Frame => play_frames(hand, clock, &plan.frame, rec, stop),
        };
        if outcome != Outcome::Completed {
            info!(repeat = repeat + 1, ?outcome, "playback ended early");
            return outcome;
        }
        debug!(repeat = repeat + 1, "repeat complete");
        if repeat + 1 < plan.repeat_count && !stop.sleep(clock, plan.repeat_pause) {
            return Outcome::Stopped;
        }
    }
    info!("playback complete");
    Outcome::Completed
}

fn send(hand: &dyn HandControl, targets: &ServoMap<i32>, profile: &MotionProfile) {
    let results = hand.send_positions(targets, profile);
    let failed: Vec<u8> = results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(id, _)| id)
        .collect();
    if !failed.is_empty() {
        warn!(?failed, "position command failed on some servos");
    }
}

fn play_realtime(
    hand: &dyn HandControl,
    clock: &dyn Clock,
    plan: &PlaybackPlan,
    stop: &StopToken,
) -> Outcome {
    let rec = &plan.recording;
    let frames = &rec.frames;
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return Outcome::Completed;
    };
    if frames.len() == 1 {
        send(hand, &first.targets(), &plan.final_approach);
        return Outcome::Completed;
    }

    send(hand, &first.targets(), &plan.realtime);
    for pair in frames.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let gap = (b.timestamp - a.timestamp).max(0.0);
        let steps = step_count(gap, rec.freq);
        let segment = Duration::try_from_secs_f64(gap / plan.speed).unwrap_or_else(|e| {
            warn!(gap, error = %e, "segment duration out of range; not pacing it");
            Duration::ZERO
        });
        let start = clock.now();
        for k in 1..=steps {
            if stop.is_stopped() {
                return Outcome::Stopped;
            }
            if !hand.is_open() {
                warn!("bus closed during playback");
                return Outcome::Aborted;
            }
            let deadline = start + segment.mul_f64(f64::from(k) / f64::from(steps));
            let wait = deadline.saturating_duration_since(clock.now());
            if !stop.sleep(clock, wait) {
                return Outcome::Stopped;
            }
            send(
                hand,
                &interpolate(a, b, f64::from(k) / f64::from(steps)),
                &plan.realtime,
            );
        }
    }
    send(hand, &last.targets(), &plan.final_approach);
    Outcome::Completed
}

fn play_frames(
    hand: &dyn HandControl,
    clock: &dyn Clock,
    settings: &FrameSettings,
    rec: &Recording,
    stop: &StopToken,
) -> Outcome {
    let profile = settings.profile();
    for (index, frame) in rec.frames.iter().enumerate() {
        if stop.is_stopped() {
            return Outcome::Stopped;
        }
        if !hand.is_open() {
            warn!("bus closed during playback");
            return Outcome::Aborted;
        }
        debug!(frame = index, "sending frame");
        send(hand, &frame.targets(), &profile);
        if !stop.sleep(clock, settings.interval) {
            return Outcome::Stopped;
        }
    }
    Outcome::Completed
}
