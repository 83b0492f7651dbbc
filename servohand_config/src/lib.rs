#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the servo hand.
//!
//! Every section is optional; a missing section or key takes the default
//! that matches the hand's stock wiring (1 Mbaud bus, 17 servos, full
//! position range). `Config::validate` checks ranges after parsing.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Serial {
    /// Device path, e.g. "/dev/ttyUSB0". Required unless running simulated.
    pub port: Option<String>,
    pub baudrate: u32,
    pub timeout_ms: u64,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            port: None,
            baudrate: 1_000_000,
            timeout_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Bus {
    /// Pause after every transmitted packet
    pub settle_ms: u64,
    /// Pause between a read request and collecting its reply
    pub response_ms: u64,
    pub read_timeout_ms: u64,
    /// Attempts per exchange
    pub retries: u8,
    pub ping_delay_ms: u64,
    pub torque_delay_ms: u64,
    pub position_delay_ms: u64,
    /// Batch position commands into one broadcast packet
    pub sync_write: bool,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            settle_ms: 1,
            response_ms: 5,
            read_timeout_ms: 20,
            retries: 3,
            ping_delay_ms: 10,
            torque_delay_ms: 5,
            position_delay_ms: 3,
            sync_write: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    #[default]
    Clamp,
    Reject,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TorqueOnMode {
    #[default]
    RestoreDefault,
    Preserve,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// "clamp" | "reject" for out-of-range goal values
    pub limits: LimitMode,
    /// "restore_default" | "preserve": goal torque after torque on
    pub torque_on: TorqueOnMode,
    pub default_torque: i32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            limits: LimitMode::Clamp,
            torque_on: TorqueOnMode::RestoreDefault,
            default_torque: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ServoEntry {
    pub min_reg: i32,
    pub max_reg: i32,
    pub invert: bool,
}

impl Default for ServoEntry {
    fn default() -> Self {
        Self {
            min_reg: -32767,
            max_reg: 32767,
            invert: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// JSON file holding per-servo limits
    pub file: Option<PathBuf>,
    pub sample_hz: u32,
    pub join_timeout_ms: u64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("calibration/servo_limits.json")),
            sample_hz: 10,
            join_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorCfg {
    pub interval_ms: u64,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self { interval_ms: 50 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordMode {
    Frame,
    #[default]
    Realtime,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingCfg {
    pub mode: RecordMode,
    /// Realtime sampling rate (Hz)
    pub freq: u32,
    pub save_dir: PathBuf,
}

impl Default for RecordingCfg {
    fn default() -> Self {
        Self {
            mode: RecordMode::Realtime,
            freq: 20,
            save_dir: PathBuf::from("./recordings"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackCfg {
    pub frame_speed: i32,
    pub frame_acceleration: i32,
    pub frame_torque: i32,
    pub frame_interval_ms: u64,
    pub realtime_speed: i32,
    pub realtime_acceleration: i32,
    pub realtime_torque: i32,
    /// Profile for the last frame of each realtime repeat
    pub final_speed: i32,
    pub final_acceleration: i32,
    pub final_torque: i32,
    pub repeat_pause_ms: u64,
}

impl Default for PlaybackCfg {
    fn default() -> Self {
        Self {
            frame_speed: 500,
            frame_acceleration: 50,
            frame_torque: 700,
            frame_interval_ms: 1000,
            realtime_speed: 1000,
            realtime_acceleration: 0,
            realtime_torque: 700,
            final_speed: 500,
            final_acceleration: 50,
            final_torque: 700,
            repeat_pause_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub serial: Serial,
    pub bus: Bus,
    pub policy: Policy,
    /// Per-servo overrides keyed by id: `[servos.3]`
    pub servos: BTreeMap<String, ServoEntry>,
    pub calibration: CalibrationCfg,
    pub monitor: MonitorCfg,
    pub recording: RecordingCfg,
    pub playback: PlaybackCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and parse a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("reading config {}: {e}", path.display()))?;
    load_toml(&text).map_err(|e| eyre::eyre!("parsing config {}: {e}", path.display()))
}

const SERVO_IDS: std::ops::RangeInclusive<u8> = 1..=17;

impl Config {
    /// Per-servo overrides with parsed ids, in id order.
    pub fn servo_entries(&self) -> eyre::Result<Vec<(u8, ServoEntry)>> {
        let mut out = Vec::with_capacity(self.servos.len());
        for (key, entry) in &self.servos {
            let id: u8 = key
                .trim()
                .parse()
                .map_err(|_| eyre::eyre!("servos.{key}: id must be an integer in 1..=17"))?;
            if !SERVO_IDS.contains(&id) {
                eyre::bail!("servos.{key}: id must be in 1..=17");
            }
            out.push((id, *entry));
        }
        out.sort_by_key(|(id, _)| *id);
        Ok(out)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.serial.baudrate == 0 {
            eyre::bail!("serial.baudrate must be > 0");
        }
        if self.serial.timeout_ms == 0 {
            eyre::bail!("serial.timeout_ms must be >= 1");
        }
        if self.bus.retries == 0 {
            eyre::bail!("bus.retries must be >= 1");
        }
        if self.bus.read_timeout_ms == 0 {
            eyre::bail!("bus.read_timeout_ms must be >= 1");
        }
        if self.bus.settle_ms > 1000 || self.bus.response_ms > 1000 {
            eyre::bail!("bus settle/response delays are unreasonably large (>1s)");
        }
        if !(0..=2047).contains(&self.policy.default_torque) {
            eyre::bail!("policy.default_torque must be in [0, 2047]");
        }
        for (id, entry) in self.servo_entries()? {
            if entry.min_reg > entry.max_reg {
                eyre::bail!("servos.{id}.min_reg must be <= max_reg");
            }
            if entry.min_reg < -32767 || entry.max_reg > 32767 {
                eyre::bail!("servos.{id} limits must be within [-32767, 32767]");
            }
        }
        if self.calibration.sample_hz == 0 {
            eyre::bail!("calibration.sample_hz must be > 0");
        }
        if self.calibration.join_timeout_ms == 0 {
            eyre::bail!("calibration.join_timeout_ms must be >= 1");
        }
        if self.monitor.interval_ms == 0 {
            eyre::bail!("monitor.interval_ms must be >= 1");
        }
        if self.recording.freq == 0 || self.recording.freq > 1000 {
            eyre::bail!("recording.freq must be in [1, 1000]");
        }
        let p = &self.playback;
        for (key, v) in [
            ("frame_speed", p.frame_speed),
            ("realtime_speed", p.realtime_speed),
            ("final_speed", p.final_speed),
        ] {
            if !(0..=32767).contains(&v) {
                eyre::bail!("playback.{key} must be in [0, 32767]");
            }
        }
        for (key, v) in [
            ("frame_acceleration", p.frame_acceleration),
            ("realtime_acceleration", p.realtime_acceleration),
            ("final_acceleration", p.final_acceleration),
        ] {
            if !(0..=254).contains(&v) {
                eyre::bail!("playback.{key} must be in [0, 254]");
            }
        }
        for (key, v) in [
            ("frame_torque", p.frame_torque),
            ("realtime_torque", p.realtime_torque),
            ("final_torque", p.final_torque),
        ] {
            if !(0..=2047).contains(&v) {
                eyre::bail!("playback.{key} must be in [0, 2047]");
            }
        }
        if p.frame_interval_ms == 0 {
            eyre::bail!("playback.frame_interval_ms must be >= 1");
        }
        if let Some(rotation) = &self.logging.rotation
            && !matches!(rotation.as_str(), "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }
        Ok(())
    }
}
