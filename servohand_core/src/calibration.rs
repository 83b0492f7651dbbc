//! Persisted per-servo position limits.
//!
//! The file is JSON keyed by servo id:
//!
//! ```json
//! { "timestamp": "2024-05-01T10:00:00+02:00",
//!   "limits": { "1": { "min": -1200, "max": 1800 } } }
//! ```
//!
//! Saving merges new limits over the existing file, so servos that were
//! not sampled keep their previous entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::actuator::Limits;
use crate::atomic::write_atomic;
use crate::error::Result;
use crate::servo_map::ServoMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CalibrationFile {
    #[serde(default)]
    pub timestamp: String,
    pub limits: BTreeMap<u8, Limits>,
}

impl CalibrationFile {
    pub fn to_servo_map(&self) -> ServoMap<Limits> {
        self.limits.iter().map(|(id, l)| (*id, *l)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// `Ok(None)` when no file has been written yet.
    pub fn load(&self) -> Result<Option<CalibrationFile>> {
        if !self.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("reading calibration file {}", self.path.display()))?;
        let file: CalibrationFile = serde_json::from_str(&text)
            .wrap_err_with(|| format!("parsing calibration file {}", self.path.display()))?;
        Ok(Some(file))
    }

    /// Merge `limits` into the stored file and write it back atomically.
    pub fn merge_and_save(&self, limits: &ServoMap<Limits>) -> Result<CalibrationFile> {
        let mut file = match self.load() {
            Ok(Some(f)) => f,
            Ok(None) => CalibrationFile::default(),
            Err(e) => {
                tracing::warn!(error = %e, "existing calibration unreadable; overwriting");
                CalibrationFile::default()
            }
        };
        for (id, l) in limits.iter() {
            file.limits.insert(id, *l);
        }
        file.timestamp = chrono::Local::now().to_rfc3339();
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &json)
            .wrap_err_with(|| format!("writing calibration file {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), servos = limits.len(), "calibration saved");
        Ok(file)
    }
}

/// Observed min/max per servo; servos without samples are omitted.
pub fn limits_from_samples(samples: &ServoMap<Vec<i32>>) -> ServoMap<Limits> {
    samples
        .iter()
        .filter_map(|(id, s)| {
            let min = *s.iter().min()?;
            let max = *s.iter().max()?;
            Some((id, Limits { min, max }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_per_servo() {
        let mut samples = ServoMap::new();
        samples.insert(3, vec![10, 50, -20, 30]);
        samples.insert(4, vec![]);
        let limits = limits_from_samples(&samples);
        assert_eq!(limits.get(3), Some(&Limits { min: -20, max: 50 }));
        assert!(!limits.contains(4));
    }

    #[test]
    fn merge_keeps_unsampled_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("cal").join("limits.json"));
        assert!(store.load().unwrap().is_none());

        let first: ServoMap<Limits> = [(1, Limits { min: -5, max: 5 }), (2, Limits { min: 0, max: 9 })]
            .into_iter()
            .collect();
        store.merge_and_save(&first).unwrap();

        let second: ServoMap<Limits> = [(2, Limits { min: -1, max: 1 })].into_iter().collect();
        let merged = store.merge_and_save(&second).unwrap();
        assert_eq!(merged.limits[&1], Limits { min: -5, max: 5 });
        assert_eq!(merged.limits[&2], Limits { min: -1, max: 1 });

        let reloaded = store.load().unwrap().unwrap();
        assert_eq!(reloaded.limits, merged.limits);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(CalibrationStore::new(&path).load().is_err());
    }
}
