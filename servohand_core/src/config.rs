//! Runtime configuration types for the hand.
//!
//! These are the structs consumed by `ProtocolCodec`, `ActuatorManager`
//! and `MotionRecorder`. They are separate from the TOML-deserialized
//! config in `servohand_config` (see `conversions`).

use std::path::PathBuf;
use std::time::Duration;

use crate::recording::RecordingMode;
use crate::registers::{WORD_MAX, WORD_MIN};

/// Timing of a single request/response exchange on the bus.
#[derive(Debug, Clone)]
pub struct BusTiming {
    /// Pause after every transmitted packet before the bus is released.
    pub settle: Duration,
    /// Pause between sending a read request and collecting the reply.
    pub response_latency: Duration,
    /// Upper bound for collecting the reply bytes.
    pub read_timeout: Duration,
    /// Attempts per exchange (>= 1).
    pub attempts: u8,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1),
            response_latency: Duration::from_millis(5),
            read_timeout: Duration::from_millis(20),
            attempts: 3,
        }
    }
}

/// Pauses between consecutive per-servo commands inside a batch.
#[derive(Debug, Clone)]
pub struct BatchDelays {
    pub ping: Duration,
    pub torque: Duration,
    pub position: Duration,
}

impl Default for BatchDelays {
    fn default() -> Self {
        Self {
            ping: Duration::from_millis(10),
            torque: Duration::from_millis(5),
            position: Duration::from_millis(3),
        }
    }
}

impl BatchDelays {
    /// No pauses at all; for simulated buses.
    pub fn none() -> Self {
        Self {
            ping: Duration::ZERO,
            torque: Duration::ZERO,
            position: Duration::ZERO,
        }
    }
}

/// What a setter does with an out-of-range value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitPolicy {
    /// Saturate to the nearest bound and send.
    #[default]
    Clamp,
    /// Refuse the command without touching the bus.
    Reject,
}

/// Goal torque applied when torque is switched back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorquePolicy {
    RestoreDefault(i32),
    /// Re-send the goal torque that was active before the last torque-off.
    PreserveLast,
}

impl Default for TorquePolicy {
    fn default() -> Self {
        TorquePolicy::RestoreDefault(1000)
    }
}

/// Per-servo mechanical setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCfg {
    pub min_position: i32,
    pub max_position: i32,
    /// Mirror-mounted joint: position and speed are negated on the wire.
    pub invert: bool,
}

impl Default for ServoCfg {
    fn default() -> Self {
        Self {
            min_position: WORD_MIN,
            max_position: WORD_MAX,
            invert: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    /// Persisted limits; `None` keeps calibration in memory only.
    pub file: Option<PathBuf>,
    pub sample_hz: u32,
    pub join_timeout: Duration,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            file: None,
            sample_hz: 10,
            join_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerCfg {
    pub timing: BusTiming,
    pub delays: BatchDelays,
    pub limit_policy: LimitPolicy,
    pub torque_policy: TorquePolicy,
    /// Send batched position commands as one broadcast packet when possible.
    pub sync_write: bool,
    /// Overrides by servo id; missing ids use `ServoCfg::default()`.
    pub servos: Vec<(u8, ServoCfg)>,
    pub calibration: CalibrationCfg,
    pub monitor_interval: Duration,
}

impl Default for ManagerCfg {
    fn default() -> Self {
        Self {
            timing: BusTiming::default(),
            delays: BatchDelays::default(),
            limit_policy: LimitPolicy::default(),
            torque_policy: TorquePolicy::default(),
            sync_write: false,
            servos: Vec::new(),
            calibration: CalibrationCfg::default(),
            monitor_interval: Duration::from_millis(50),
        }
    }
}

impl ManagerCfg {
    pub fn servo(&self, id: u8) -> ServoCfg {
        self.servos
            .iter()
            .rev()
            .find(|(sid, _)| *sid == id)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }
}

/// Optional motion parameters sent ahead of a goal position.
/// `None` leaves the servo's current register value untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionProfile {
    pub speed: Option<i32>,
    pub acceleration: Option<i32>,
    pub torque: Option<i32>,
}

impl MotionProfile {
    pub const fn new(speed: i32, acceleration: i32, torque: i32) -> Self {
        Self {
            speed: Some(speed),
            acceleration: Some(acceleration),
            torque: Some(torque),
        }
    }

    /// All three parameters, if every one is set.
    pub fn complete(&self) -> Option<(i32, i32, i32)> {
        Some((self.speed?, self.acceleration?, self.torque?))
    }
}

/// Motion profile and pacing used for frame-mode playback.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    pub speed: i32,
    pub acceleration: i32,
    pub torque: i32,
    pub interval: Duration,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            speed: 500,
            acceleration: 50,
            torque: 700,
            interval: Duration::from_secs(1),
        }
    }
}

impl FrameSettings {
    pub fn profile(&self) -> MotionProfile {
        MotionProfile::new(self.speed, self.acceleration, self.torque)
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackCfg {
    pub frame: FrameSettings,
    /// Profile for every interpolated realtime step.
    pub realtime: MotionProfile,
    /// Gentler profile for the last frame of each realtime repeat.
    pub final_approach: MotionProfile,
    pub repeat_pause: Duration,
}

impl Default for PlaybackCfg {
    fn default() -> Self {
        Self {
            frame: FrameSettings::default(),
            realtime: MotionProfile::new(1000, 0, 700),
            final_approach: MotionProfile::new(500, 50, 700),
            repeat_pause: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderCfg {
    pub mode: RecordingMode,
    pub freq: u32,
    pub save_dir: PathBuf,
    pub playback: PlaybackCfg,
    pub join_timeout: Duration,
}

impl Default for RecorderCfg {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Realtime,
            freq: 20,
            save_dir: PathBuf::from("./recordings"),
            playback: PlaybackCfg::default(),
            join_timeout: Duration::from_secs(1),
        }
    }
}
