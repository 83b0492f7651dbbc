//! The hand: all 17 actuators on one bus, batch operations, calibration
//! and feedback monitoring.
//!
//! Batch operations return a [`ServoMap`] with one entry per servo they
//! addressed. Disconnected servos are reported as failed (or omitted for
//! reads) and never generate bus traffic.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::actuator::{Actuator, Feedback, Limits, PreparedMotion};
use crate::calibration::{CalibrationStore, limits_from_samples};
use crate::codec::{ProtocolCodec, SharedClock};
use crate::config::{BatchDelays, CalibrationCfg, MotionProfile};
use crate::error::HandError;
use crate::monitor::{FeedbackSnapshot, MonitorObserver, notify};
use crate::registers::{MOTION_BLOCK_LEN, MOTION_BLOCK_START};
use crate::servo_map::{ServoMap, slot};
use crate::util;
use crate::worker::{StopToken, Worker};

/// What the recorder needs from the hand. Implemented by [`ActuatorManager`];
/// tests substitute scripted hands.
pub trait HandControl: Send + Sync {
    fn read_positions(&self) -> ServoMap<Option<i32>>;
    fn send_positions(&self, targets: &ServoMap<i32>, profile: &MotionProfile) -> ServoMap<bool>;
    fn enable_torque(&self) -> ServoMap<bool>;
    /// False once the underlying link is gone for good.
    fn is_open(&self) -> bool {
        true
    }
}

pub(crate) struct ServoBank {
    pub(crate) codec: Arc<ProtocolCodec>,
    pub(crate) servos: Vec<Actuator>,
    pub(crate) delays: BatchDelays,
    pub(crate) sync_write: bool,
}

impl ServoBank {
    fn clock(&self) -> &SharedClock {
        self.codec.clock()
    }

    fn actuator(&self, id: u8) -> Option<&Actuator> {
        slot(id).and_then(|i| self.servos.get(i))
    }

    fn connected(&self) -> impl Iterator<Item = &Actuator> + '_ {
        self.servos.iter().filter(|a| a.is_connected())
    }

    fn pause(&self, d: Duration) {
        if !d.is_zero() {
            self.clock().sleep(d);
        }
    }

    fn read_positions(&self, stop: Option<&StopToken>) -> ServoMap<Option<i32>> {
        let mut out = ServoMap::new();
        for a in self.connected() {
            if stop.is_some_and(StopToken::is_stopped) {
                break;
            }
            out.insert(a.id(), a.read_present_position());
        }
        out
    }

    fn read_feedback(&self, stop: Option<&StopToken>) -> FeedbackSnapshot {
        let mut out = ServoMap::new();
        for a in self.connected() {
            if stop.is_some_and(StopToken::is_stopped) {
                break;
            }
            let fb = a.read_feedback();
            out.insert(a.id(), (!fb.is_empty()).then_some(fb));
        }
        out
    }

    fn for_each_connected(
        &self,
        what: &str,
        delay: Duration,
        op: impl Fn(&Actuator) -> Result<(), HandError>,
    ) -> ServoMap<bool> {
        let mut out = ServoMap::new();
        for a in self.connected() {
            let ok = match op(a) {
                Ok(()) => true,
                Err(e) => {
                    warn!(servo_id = a.id(), op = what, error = %e, "servo command failed");
                    false
                }
            };
            out.insert(a.id(), ok);
            self.pause(delay);
        }
        out
    }

    fn set_positions(&self, targets: &ServoMap<i32>, profile: &MotionProfile) -> ServoMap<bool> {
        let mut results = ServoMap::new();
        let mut live: Vec<(&Actuator, i32)> = Vec::new();
        for (id, &pos) in targets.iter() {
            match self.actuator(id) {
                Some(a) if a.is_connected() => live.push((a, pos)),
                _ => {
                    results.insert(id, false);
                }
            }
        }

        if self.sync_write
            && live.len() > 1
            && let Some((speed, acc, torque)) = profile.complete()
        {
            let mut prepared: Vec<(&Actuator, PreparedMotion)> = Vec::with_capacity(live.len());
            for (a, pos) in &live {
                match a.prepare_motion(*pos, speed, acc, torque) {
                    Ok(m) => prepared.push((*a, m)),
                    Err(e) => {
                        warn!(servo_id = a.id(), error = %e, "position rejected");
                        results.insert(a.id(), false);
                    }
                }
            }
            let entries: Vec<(u8, &[u8])> =
                prepared.iter().map(|(_, m)| (m.id, &m.block[..])).collect();
            match self
                .codec
                .sync_write(MOTION_BLOCK_START, MOTION_BLOCK_LEN, &entries)
            {
                Ok(()) => {
                    for (a, m) in &prepared {
                        a.commit_motion(m);
                        results.insert(a.id(), true);
                    }
                    return results;
                }
                Err(e) => {
                    warn!(error = %e, "sync write failed; falling back to per-servo writes");
                    live = prepared.iter().map(|(a, m)| (*a, m.position)).collect();
                }
            }
        }

        for (a, pos) in live {
            let ok = match a.apply_motion(pos, profile) {
                Ok(()) => true,
                Err(e) => {
                    warn!(servo_id = a.id(), position = pos, error = %e, "position command failed");
                    false
                }
            };
            results.insert(a.id(), ok);
            self.pause(self.delays.position);
        }
        results
    }
}

struct CalibrationRun {
    worker: Worker,
    samples: Arc<Mutex<ServoMap<Vec<i32>>>>,
}

pub struct ActuatorManager {
    bank: Arc<ServoBank>,
    store: Option<CalibrationStore>,
    calibration_cfg: CalibrationCfg,
    monitor_interval: Duration,
    calibration: Mutex<Option<CalibrationRun>>,
    monitor: Mutex<Option<Worker>>,
    observers: Arc<Mutex<Vec<Arc<dyn MonitorObserver>>>>,
}

impl std::fmt::Debug for ActuatorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorManager")
            .field("servos", &self.bank.servos.len())
            .field("calibrating", &self.is_calibrating())
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

impl ActuatorManager {
    pub(crate) fn from_parts(
        bank: ServoBank,
        store: Option<CalibrationStore>,
        calibration_cfg: CalibrationCfg,
        monitor_interval: Duration,
    ) -> Self {
        Self {
            bank: Arc::new(bank),
            store,
            calibration_cfg,
            monitor_interval,
            calibration: Mutex::new(None),
            monitor: Mutex::new(None),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn clock(&self) -> SharedClock {
        self.bank.clock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.bank.codec.is_open()
    }

    pub fn get_servo(&self, id: u8) -> Option<&Actuator> {
        self.bank.actuator(id)
    }

    pub fn servos(&self) -> impl Iterator<Item = &Actuator> + '_ {
        self.bank.servos.iter()
    }

    pub fn connected_ids(&self) -> Vec<u8> {
        self.bank.connected().map(Actuator::id).collect()
    }

    pub fn get_servo_limits(&self, id: u8) -> Option<Limits> {
        self.get_servo(id).map(Actuator::limits)
    }

    /// Probe every id and refresh connection state.
    pub fn ping_all(&self) -> ServoMap<bool> {
        let mut out = ServoMap::new();
        for a in &self.bank.servos {
            out.insert(a.id(), a.ping());
            self.bank.pause(self.bank.delays.ping);
        }
        let online = out.values().filter(|ok| **ok).count();
        info!(online, total = out.len(), "ping sweep complete");
        out
    }

    pub fn torque_on_all(&self) -> ServoMap<bool> {
        self.bank
            .for_each_connected("torque_on", self.bank.delays.torque, Actuator::torque_on)
    }

    pub fn torque_off_all(&self) -> ServoMap<bool> {
        self.bank
            .for_each_connected("torque_off", self.bank.delays.torque, Actuator::torque_off)
    }

    pub fn damping_all(&self) -> ServoMap<bool> {
        self.bank.for_each_connected(
            "damping",
            self.bank.delays.torque,
            Actuator::set_damping_mode,
        )
    }

    /// Command goal positions, optionally preceded by speed, acceleration
    /// and torque. Unknown or disconnected ids report `false` without any
    /// bus traffic; a servo reports `true` only if all its writes succeeded.
    pub fn set_all_positions(
        &self,
        targets: &ServoMap<i32>,
        profile: &MotionProfile,
    ) -> ServoMap<bool> {
        self.bank.set_positions(targets, profile)
    }

    /// Present positions of connected servos; `None` where the read failed.
    pub fn read_all_positions(&self) -> ServoMap<Option<i32>> {
        self.bank.read_positions(None)
    }

    pub fn read_all_feedback(&self) -> FeedbackSnapshot {
        self.bank.read_feedback(None)
    }

    pub fn read_feedback(&self, id: u8) -> Option<Feedback> {
        self.get_servo(id).map(Actuator::read_feedback)
    }

    // ── Calibration ──────────────────────────────────────────────────────────

    pub fn has_calibration_data(&self) -> bool {
        self.store.as_ref().is_some_and(CalibrationStore::exists)
    }

    pub fn calibration_store(&self) -> Option<&CalibrationStore> {
        self.store.as_ref()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.lock().is_some()
    }

    /// Release torque on connected servos and start sampling their
    /// positions while the operator moves each joint through its range.
    pub fn start_calibration(&self) -> Result<(), HandError> {
        let mut guard = self.calibration.lock();
        if guard.is_some() {
            return Err(HandError::State("calibration already running".into()));
        }
        self.torque_off_all();

        let samples = Arc::new(Mutex::new(ServoMap::<Vec<i32>>::new()));
        let sink = samples.clone();
        let bank = self.bank.clone();
        let period = util::period(self.calibration_cfg.sample_hz);
        let worker = Worker::spawn("calibration", move |stop| {
            let clock = bank.clock().clone();
            loop {
                if stop.is_stopped() {
                    break;
                }
                if !bank.codec.is_open() {
                    warn!("bus closed; calibration sampling stopped");
                    break;
                }
                let t0 = clock.now();
                let readings = bank.read_positions(Some(&stop));
                {
                    let mut acc = sink.lock();
                    for (id, pos) in readings.iter() {
                        let Some(pos) = *pos else { continue };
                        match acc.get_mut(id) {
                            Some(v) => v.push(pos),
                            None => {
                                acc.insert(id, vec![pos]);
                            }
                        }
                    }
                }
                let spent = clock.now().saturating_duration_since(t0);
                if !stop.sleep(&*clock, period.saturating_sub(spent)) {
                    break;
                }
            }
        })
        .map_err(|e| HandError::Io(e.to_string()))?;

        info!(sample_hz = self.calibration_cfg.sample_hz, "calibration started");
        *guard = Some(CalibrationRun { worker, samples });
        Ok(())
    }

    /// Stop sampling, apply the observed min/max to live actuators and
    /// persist them. Servos without samples keep their limits.
    ///
    /// A persistence failure is returned after the live limits were applied.
    pub fn stop_calibration(&self) -> Result<ServoMap<Limits>, HandError> {
        let run = self
            .calibration
            .lock()
            .take()
            .ok_or_else(|| HandError::State("calibration is not running".into()))?;
        run.worker.stop(self.calibration_cfg.join_timeout);
        let samples = std::mem::take(&mut *run.samples.lock());
        let limits = limits_from_samples(&samples);

        for (id, l) in limits.iter() {
            if let Some(a) = self.get_servo(id)
                && let Err(e) = a.update_limits(*l)
            {
                warn!(servo_id = id, error = %e, "observed limits not applied");
            }
        }
        info!(servos = limits.len(), "calibration finished");

        if let Some(store) = &self.store {
            store
                .merge_and_save(&limits)
                .map_err(|e| HandError::Io(format!("{e:#}")))?;
        }
        Ok(limits)
    }

    /// Start, wait `duration` on the bus clock, stop.
    pub fn calibrate_for(&self, duration: Duration) -> Result<ServoMap<Limits>, HandError> {
        self.start_calibration()?;
        self.bank.clock().sleep(duration);
        self.stop_calibration()
    }

    /// Apply previously saved limits to live actuators.
    pub fn apply_limits(&self, limits: &ServoMap<Limits>) -> usize {
        let mut applied = 0;
        for (id, l) in limits.iter() {
            match self.get_servo(id).map(|a| a.update_limits(*l)) {
                Some(Ok(())) => applied += 1,
                Some(Err(e)) => warn!(servo_id = id, error = %e, "stored limits rejected"),
                None => debug!(servo_id = id, "stored limits for unknown servo ignored"),
            }
        }
        applied
    }

    // ── Monitoring ───────────────────────────────────────────────────────────

    pub fn add_monitor_observer(&self, observer: impl MonitorObserver + 'static) {
        self.observers.lock().push(Arc::new(observer));
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().as_ref().is_some_and(Worker::is_running)
    }

    /// Read feedback of every connected servo each `interval` (configured
    /// default when `None`) and hand it to the observers.
    pub fn start_monitoring(&self, interval: Option<Duration>) -> Result<(), HandError> {
        let mut guard = self.monitor.lock();
        if guard.as_ref().is_some_and(Worker::is_running) {
            return Err(HandError::State("monitoring already running".into()));
        }
        let interval = interval.unwrap_or(self.monitor_interval);
        let bank = self.bank.clone();
        let observers = self.observers.clone();
        let worker = Worker::spawn("monitor", move |stop| {
            let clock = bank.clock().clone();
            while !stop.is_stopped() {
                if !bank.codec.is_open() {
                    warn!("bus closed; monitoring stopped");
                    break;
                }
                let t0 = clock.now();
                let snapshot = bank.read_feedback(Some(&stop));
                let current: Vec<_> = observers.lock().clone();
                notify(&current, &snapshot);
                let spent = clock.now().saturating_duration_since(t0);
                if !stop.sleep(&*clock, interval.saturating_sub(spent)) {
                    break;
                }
            }
        })
        .map_err(|e| HandError::Io(e.to_string()))?;
        info!(interval_ms = interval.as_millis() as u64, "monitoring started");
        *guard = Some(worker);
        Ok(())
    }

    /// True if a monitor was running.
    pub fn stop_monitoring(&self) -> bool {
        match self.monitor.lock().take() {
            Some(w) => {
                w.stop(self.calibration_cfg.join_timeout);
                info!("monitoring stopped");
                true
            }
            None => false,
        }
    }
}

impl HandControl for ActuatorManager {
    fn read_positions(&self) -> ServoMap<Option<i32>> {
        self.read_all_positions()
    }

    fn send_positions(&self, targets: &ServoMap<i32>, profile: &MotionProfile) -> ServoMap<bool> {
        self.set_all_positions(targets, profile)
    }

    fn enable_torque(&self) -> ServoMap<bool> {
        self.torque_on_all()
    }

    fn is_open(&self) -> bool {
        ActuatorManager::is_open(self)
    }
}

impl Drop for ActuatorManager {
    fn drop(&mut self) {
        if let Some(run) = self.calibration.get_mut().take() {
            run.worker.stop(self.calibration_cfg.join_timeout);
        }
        if let Some(w) = self.monitor.get_mut().take() {
            w.stop(self.calibration_cfg.join_timeout);
        }
    }
}
