//! Recorded motion: a timestamped sequence of hand poses and its JSON file
//! format.
//!
//! ```json
//! {
//!   "meta": { "mode": "realtime", "freq": 20, "created": "2024-05-01T10:00:00.123",
//!             "frame_count": 2, "duration": 0.05, "servo_ids": [1, 2] },
//!   "frames": [ { "timestamp": 0.0, "positions": { "1": 100, "2": -40 } }, ... ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{HandError, Result};
use crate::servo_map::ServoMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Operator captures poses one at a time.
    Frame,
    /// A sampler captures poses at a fixed rate.
    #[default]
    Realtime,
}

impl RecordingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordingMode::Frame => "frame",
            RecordingMode::Realtime => "realtime",
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingMode {
    type Err = HandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frame" => Ok(RecordingMode::Frame),
            "realtime" => Ok(RecordingMode::Realtime),
            other => Err(HandError::Validation(format!(
                "unknown recording mode {other:?} (expected frame|realtime)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingFrame {
    /// Seconds since recording started.
    pub timestamp: f64,
    pub positions: BTreeMap<u8, i32>,
}

impl RecordingFrame {
    /// Keep only the servos that produced a reading.
    pub fn from_readings(timestamp: f64, readings: &ServoMap<Option<i32>>) -> Self {
        Self {
            timestamp,
            positions: readings
                .iter()
                .filter_map(|(id, p)| p.map(|p| (id, p)))
                .collect(),
        }
    }

    pub fn targets(&self) -> ServoMap<i32> {
        self.positions.iter().map(|(id, p)| (*id, *p)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub mode: RecordingMode,
    pub freq: u32,
    pub created: NaiveDateTime,
    pub frames: Vec<RecordingFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub mode: RecordingMode,
    pub freq: u32,
    pub frame_count: usize,
    pub duration: f64,
    pub servo_ids: Vec<u8>,
}

fn default_freq() -> u32 {
    20
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    #[serde(default)]
    mode: RecordingMode,
    #[serde(default = "default_freq")]
    freq: u32,
    created: NaiveDateTime,
    #[serde(default)]
    frame_count: usize,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    servo_ids: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordingFile {
    meta: Meta,
    frames: Vec<RecordingFrame>,
}

impl Recording {
    pub fn new(mode: RecordingMode, freq: u32) -> Self {
        Self {
            mode,
            freq,
            created: chrono::Local::now().naive_local(),
            frames: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Timestamp of the last frame, in seconds.
    pub fn duration(&self) -> f64 {
        self.frames.last().map_or(0.0, |f| f.timestamp)
    }

    pub fn servo_ids(&self) -> Vec<u8> {
        let ids: BTreeSet<u8> = self
            .frames
            .iter()
            .flat_map(|f| f.positions.keys().copied())
            .collect();
        ids.into_iter().collect()
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            mode: self.mode,
            freq: self.freq,
            frame_count: self.frames.len(),
            duration: self.duration(),
            servo_ids: self.servo_ids(),
        }
    }

    /// `recording_<mode>_<YYYYmmdd_HHMMSS>.json`
    pub fn default_file_name(&self) -> String {
        format!(
            "recording_{}_{}.json",
            self.mode,
            self.created.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn to_json(&self) -> std::result::Result<String, HandError> {
        let file = RecordingFile {
            meta: Meta {
                mode: self.mode,
                freq: self.freq,
                created: self.created,
                frame_count: self.frames.len(),
                duration: self.duration(),
                servo_ids: self.servo_ids(),
            },
            frames: self.frames.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, HandError> {
        let file: RecordingFile = serde_json::from_str(text)?;
        if file.meta.freq == 0 {
            return Err(HandError::Format("recording freq must be > 0".into()));
        }
        let starts_at_zero_or_later = file
            .frames
            .first()
            .is_none_or(|f| f.timestamp.is_finite() && f.timestamp >= 0.0);
        if !starts_at_zero_or_later
            || file
                .frames
                .windows(2)
                .any(|w| w[1].timestamp < w[0].timestamp || !w[1].timestamp.is_finite())
        {
            return Err(HandError::Format(
                "frame timestamps must be finite, non-negative and non-decreasing".into(),
            ));
        }
        Ok(Self {
            mode: file.meta.mode,
            freq: file.meta.freq,
            created: file.meta.created,
            frames: file.frames,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes())
            .wrap_err_with(|| format!("writing recording {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading recording {}", path.display()))?;
        let rec = Self::from_json(&text)
            .wrap_err_with(|| format!("parsing recording {}", path.display()))?;
        Ok(rec)
    }
}
