//! Type-state builder for [`ActuatorManager`].

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use servohand_traits::{Clock, MonotonicClock, Transport};

use crate::actuator::Actuator;
use crate::calibration::CalibrationStore;
use crate::codec::{BoxedTransport, ProtocolCodec};
use crate::config::ManagerCfg;
use crate::error::{BuildError, Result};
use crate::manager::{ActuatorManager, ServoBank};
use crate::servo_map::SERVO_IDS;

pub struct Missing;
pub struct Set;

pub struct ManagerBuilder<T> {
    transport: Option<BoxedTransport>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    cfg: ManagerCfg,
    calibration_file: Option<PathBuf>,
    _t: PhantomData<T>,
}

impl Default for ManagerBuilder<Missing> {
    fn default() -> Self {
        Self {
            transport: None,
            clock: None,
            cfg: ManagerCfg::default(),
            calibration_file: None,
            _t: PhantomData,
        }
    }
}

impl ActuatorManager {
    pub fn builder() -> ManagerBuilder<Missing> {
        ManagerBuilder::default()
    }
}

fn validate(cfg: &ManagerCfg) -> Result<()> {
    if cfg.timing.attempts == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "bus attempts must be >= 1",
        )));
    }
    if cfg.timing.read_timeout.is_zero() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "read timeout must be > 0",
        )));
    }
    if cfg.calibration.sample_hz == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "calibration sample_hz must be > 0",
        )));
    }
    if cfg.monitor_interval.is_zero() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "monitor interval must be > 0",
        )));
    }
    for (id, servo) in &cfg.servos {
        if !SERVO_IDS.contains(id) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "servo id out of range 1..=17",
            )));
        }
        if servo.min_position > servo.max_position {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "servo min position above max position",
            )));
        }
    }
    Ok(())
}

impl<T> ManagerBuilder<T> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<ActuatorManager> {
        let transport = self
            .transport
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTransport))?;
        let cfg = self.cfg;
        validate(&cfg)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let codec = Arc::new(ProtocolCodec::new(transport, clock, cfg.timing.clone()));
        let servos = SERVO_IDS
            .map(|id| {
                Actuator::new(
                    id,
                    codec.clone(),
                    cfg.servo(id),
                    cfg.limit_policy,
                    cfg.torque_policy,
                )
            })
            .collect();

        let store = self
            .calibration_file
            .or_else(|| cfg.calibration.file.clone())
            .map(CalibrationStore::new);
        let manager = ActuatorManager::from_parts(
            ServoBank {
                codec,
                servos,
                delays: cfg.delays.clone(),
                sync_write: cfg.sync_write,
            },
            store,
            cfg.calibration.clone(),
            cfg.monitor_interval,
        );

        if let Some(store) = manager.calibration_store() {
            match store.load() {
                Ok(Some(file)) => {
                    let applied = manager.apply_limits(&file.to_servo_map());
                    tracing::info!(path = %store.path().display(), applied, "calibration loaded");
                }
                Ok(None) => {
                    tracing::debug!(path = %store.path().display(), "no calibration file yet");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "calibration file ignored");
                }
            }
        }
        Ok(manager)
    }

    pub fn with_config(mut self, cfg: ManagerCfg) -> Self {
        self.cfg = cfg;
        self
    }

    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides `ManagerCfg::calibration.file`.
    pub fn with_calibration_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.calibration_file = Some(path.into());
        self
    }
}

impl ManagerBuilder<Missing> {
    pub fn with_transport(
        self,
        transport: impl Transport + Send + 'static,
    ) -> ManagerBuilder<Set> {
        ManagerBuilder {
            transport: Some(Box::new(transport)),
            clock: self.clock,
            cfg: self.cfg,
            calibration_file: self.calibration_file,
            _t: PhantomData,
        }
    }
}

impl ManagerBuilder<Set> {
    /// Validate and build. Only available once a transport is set.
    pub fn build(self) -> Result<ActuatorManager> {
        self.try_build()
    }
}
