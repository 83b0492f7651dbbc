//! `From` implementations bridging `servohand_config` types to `servohand_core` types.

use std::time::Duration;

use crate::config::{
    BatchDelays, BusTiming, CalibrationCfg, FrameSettings, LimitPolicy, ManagerCfg, MotionProfile,
    PlaybackCfg, RecorderCfg, ServoCfg, TorquePolicy,
};
use crate::recording::RecordingMode;

// ── Bus ──────────────────────────────────────────────────────────────────────

impl From<&servohand_config::Bus> for BusTiming {
    fn from(c: &servohand_config::Bus) -> Self {
        Self {
            settle: Duration::from_millis(c.settle_ms),
            response_latency: Duration::from_millis(c.response_ms),
            read_timeout: Duration::from_millis(c.read_timeout_ms),
            attempts: c.retries,
        }
    }
}

impl From<&servohand_config::Bus> for BatchDelays {
    fn from(c: &servohand_config::Bus) -> Self {
        Self {
            ping: Duration::from_millis(c.ping_delay_ms),
            torque: Duration::from_millis(c.torque_delay_ms),
            position: Duration::from_millis(c.position_delay_ms),
        }
    }
}

// ── Policy ───────────────────────────────────────────────────────────────────

impl From<servohand_config::LimitMode> for LimitPolicy {
    fn from(m: servohand_config::LimitMode) -> Self {
        match m {
            servohand_config::LimitMode::Clamp => LimitPolicy::Clamp,
            servohand_config::LimitMode::Reject => LimitPolicy::Reject,
        }
    }
}

impl From<&servohand_config::Policy> for TorquePolicy {
    fn from(c: &servohand_config::Policy) -> Self {
        match c.torque_on {
            servohand_config::TorqueOnMode::RestoreDefault => {
                TorquePolicy::RestoreDefault(c.default_torque)
            }
            servohand_config::TorqueOnMode::Preserve => TorquePolicy::PreserveLast,
        }
    }
}

impl From<&servohand_config::ServoEntry> for ServoCfg {
    fn from(c: &servohand_config::ServoEntry) -> Self {
        Self {
            min_position: c.min_reg,
            max_position: c.max_reg,
            invert: c.invert,
        }
    }
}

impl From<&servohand_config::CalibrationCfg> for CalibrationCfg {
    fn from(c: &servohand_config::CalibrationCfg) -> Self {
        Self {
            file: c.file.clone(),
            sample_hz: c.sample_hz,
            join_timeout: Duration::from_millis(c.join_timeout_ms),
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Servo entries with unparseable ids are skipped here; `Config::validate`
/// reports them.
impl From<&servohand_config::Config> for ManagerCfg {
    fn from(c: &servohand_config::Config) -> Self {
        Self {
            timing: BusTiming::from(&c.bus),
            delays: BatchDelays::from(&c.bus),
            limit_policy: c.policy.limits.into(),
            torque_policy: TorquePolicy::from(&c.policy),
            sync_write: c.bus.sync_write,
            servos: c
                .servo_entries()
                .unwrap_or_default()
                .iter()
                .map(|(id, e)| (*id, ServoCfg::from(e)))
                .collect(),
            calibration: CalibrationCfg::from(&c.calibration),
            monitor_interval: Duration::from_millis(c.monitor.interval_ms),
        }
    }
}

// ── Recorder ─────────────────────────────────────────────────────────────────

impl From<servohand_config::RecordMode> for RecordingMode {
    fn from(m: servohand_config::RecordMode) -> Self {
        match m {
            servohand_config::RecordMode::Frame => RecordingMode::Frame,
            servohand_config::RecordMode::Realtime => RecordingMode::Realtime,
        }
    }
}

impl From<&servohand_config::PlaybackCfg> for PlaybackCfg {
    fn from(c: &servohand_config::PlaybackCfg) -> Self {
        Self {
            frame: FrameSettings {
                speed: c.frame_speed,
                acceleration: c.frame_acceleration,
                torque: c.frame_torque,
                interval: Duration::from_millis(c.frame_interval_ms),
            },
            realtime: MotionProfile::new(c.realtime_speed, c.realtime_acceleration, c.realtime_torque),
            final_approach: MotionProfile::new(c.final_speed, c.final_acceleration, c.final_torque),
            repeat_pause: Duration::from_millis(c.repeat_pause_ms),
        }
    }
}

impl From<&servohand_config::Config> for RecorderCfg {
    fn from(c: &servohand_config::Config) -> Self {
        Self {
            mode: c.recording.mode.into(),
            freq: c.recording.freq,
            save_dir: c.recording.save_dir.clone(),
            playback: PlaybackCfg::from(&c.playback),
            join_timeout: Duration::from_millis(c.calibration.join_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_maps_to_manager_cfg() {
        let cfg = servohand_config::load_toml(
            "[bus]\nretries = 5\nsync_write = true\n[policy]\nlimits = \"reject\"\ntorque_on = \"preserve\"\n[servos.4]\ninvert = true\nmin_reg = -10\nmax_reg = 10",
        )
        .unwrap();
        let m = ManagerCfg::from(&cfg);
        assert_eq!(m.timing.attempts, 5);
        assert!(m.sync_write);
        assert_eq!(m.limit_policy, LimitPolicy::Reject);
        assert_eq!(m.torque_policy, TorquePolicy::PreserveLast);
        assert_eq!(
            m.servo(4),
            ServoCfg {
                min_position: -10,
                max_position: 10,
                invert: true
            }
        );
        assert_eq!(m.servo(5), ServoCfg::default());
    }

    #[test]
    fn defaults_match_runtime_defaults() {
        let cfg = servohand_config::Config::default();
        let r = RecorderCfg::from(&cfg);
        let d = RecorderCfg::default();
        assert_eq!(r.freq, d.freq);
        assert_eq!(r.mode, d.mode);
        assert_eq!(r.playback.frame, d.playback.frame);
        assert_eq!(r.playback.realtime, d.playback.realtime);
        assert_eq!(r.playback.final_approach, d.playback.final_approach);
        assert_eq!(r.playback.repeat_pause, d.playback.repeat_pause);
    }
}
