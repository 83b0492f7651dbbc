//! One servo on the bus: goal setters, feedback reads and cached state.
//!
//! Setters validate against `LimitPolicy` before anything is sent; a
//! rejected value never reaches the bus. Cached fields only change after
//! the corresponding write succeeded.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::ProtocolCodec;
use crate::config::{LimitPolicy, MotionProfile, ServoCfg, TorquePolicy};
use crate::error::HandError;
use crate::protocol::{encode_word, saturate_word};
use crate::registers::{
    self, ACCELERATION, ACCELERATION_MAX, GOAL_POSITION, GOAL_SPEED, GOAL_TORQUE,
    GOAL_TORQUE_MAX, MOTION_BLOCK_LEN, PRESENT_LOAD, PRESENT_POSITION, PRESENT_SPEED,
    PRESENT_TEMPERATURE, PRESENT_VOLTAGE, TORQUE_LIMIT, TORQUE_LIMIT_MAX, TORQUE_SWITCH,
    TorqueMode, WORD_MAX, WORD_MIN,
};

/// Inclusive position range, in raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub min: i32,
    pub max: i32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min: WORD_MIN,
            max: WORD_MAX,
        }
    }
}

impl Limits {
    /// Ordered limits within the word range.
    pub fn new(min: i32, max: i32) -> Result<Self, HandError> {
        if min > max {
            return Err(HandError::Validation(format!(
                "min position {min} is above max {max}"
            )));
        }
        Ok(Self {
            min: min.clamp(WORD_MIN, WORD_MAX),
            max: max.clamp(WORD_MIN, WORD_MAX),
        })
    }

    pub fn contains(&self, position: i32) -> bool {
        (self.min..=self.max).contains(&position)
    }
}

/// Cached view of what was last commanded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActuatorState {
    pub connected: bool,
    pub torque_enabled: bool,
    pub position: Option<i32>,
    pub speed: Option<i32>,
    pub acceleration: Option<i32>,
    pub torque: Option<i32>,
    pub limits: Limits,
    pub invert: bool,
}

/// One feedback sweep of a servo in engineering units. Any field whose
/// read failed is `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Feedback {
    pub id: u8,
    pub connected: bool,
    pub torque_enabled: bool,
    pub position: Option<i32>,
    pub position_deg: Option<f64>,
    pub speed_rpm: Option<f64>,
    pub load_percent: Option<f64>,
    pub voltage: Option<f64>,
    pub temperature: Option<f64>,
}

impl Feedback {
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.speed_rpm.is_none()
            && self.load_percent.is_none()
            && self.voltage.is_none()
            && self.temperature.is_none()
    }
}

/// A validated motion command ready for the wire, see [`Actuator::prepare_motion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedMotion {
    pub id: u8,
    pub position: i32,
    pub speed: i32,
    pub acceleration: i32,
    pub torque: i32,
    /// `[acc, pos_l, pos_h, torque_l, torque_h, speed_l, speed_h]`
    pub block: [u8; MOTION_BLOCK_LEN as usize],
}

pub struct Actuator {
    id: u8,
    codec: Arc<ProtocolCodec>,
    limit_policy: LimitPolicy,
    torque_policy: TorquePolicy,
    state: Mutex<ActuatorState>,
    /// Goal torque in effect right before the last torque-off.
    torque_before_off: Mutex<Option<i32>>,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Actuator {
    pub fn new(
        id: u8,
        codec: Arc<ProtocolCodec>,
        cfg: ServoCfg,
        limit_policy: LimitPolicy,
        torque_policy: TorquePolicy,
    ) -> Self {
        let limits = Limits::new(cfg.min_position, cfg.max_position).unwrap_or_default();
        Self {
            id,
            codec,
            limit_policy,
            torque_policy,
            state: Mutex::new(ActuatorState {
                limits,
                invert: cfg.invert,
                ..ActuatorState::default()
            }),
            torque_before_off: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Snapshot of the cached state.
    pub fn state(&self) -> ActuatorState {
        self.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_torque_enabled(&self) -> bool {
        self.state.lock().torque_enabled
    }

    pub fn limits(&self) -> Limits {
        self.state.lock().limits
    }

    /// Probe the servo by reading its present position; updates `connected`.
    pub fn ping(&self) -> bool {
        let ok = self.codec.read_word(self.id, PRESENT_POSITION.address).is_ok();
        self.state.lock().connected = ok;
        debug!(servo_id = self.id, connected = ok, "ping");
        ok
    }

    pub fn torque_on(&self) -> Result<(), HandError> {
        self.codec
            .write_byte(self.id, TORQUE_SWITCH.address, TorqueMode::On.into())?;
        self.state.lock().torque_enabled = true;

        let restore = match self.torque_policy {
            TorquePolicy::RestoreDefault(t) => Some(t),
            TorquePolicy::PreserveLast => *self.torque_before_off.lock(),
        };
        if let Some(t) = restore
            && let Err(e) = self.set_goal_torque(t)
        {
            warn!(servo_id = self.id, error = %e, "torque enabled but goal torque not restored");
        }
        Ok(())
    }

    /// Zero the motion registers, then release the motor.
    pub fn torque_off(&self) -> Result<(), HandError> {
        for (reg, what) in [(GOAL_SPEED, "speed"), (GOAL_TORQUE, "torque")] {
            if let Err(e) = self.codec.write_word(self.id, reg.address, 0) {
                debug!(servo_id = self.id, register = what, error = %e, "zeroing before torque off failed");
            }
        }
        if let Err(e) = self.codec.write_byte(self.id, ACCELERATION.address, 0) {
            debug!(servo_id = self.id, register = "acceleration", error = %e, "zeroing before torque off failed");
        }
        self.codec
            .write_byte(self.id, TORQUE_SWITCH.address, TorqueMode::Off.into())?;

        let mut st = self.state.lock();
        *self.torque_before_off.lock() = st.torque;
        st.torque_enabled = false;
        st.position = None;
        st.speed = None;
        st.acceleration = None;
        st.torque = None;
        Ok(())
    }

    /// Passive resistance to motion; tracked torque state is left as is.
    pub fn set_damping_mode(&self) -> Result<(), HandError> {
        self.codec
            .write_byte(self.id, TORQUE_SWITCH.address, TorqueMode::Damping.into())
    }

    pub fn set_goal_position(&self, position: i32) -> Result<(), HandError> {
        let (logical, wire) = self.admit_position(position)?;
        self.codec
            .write_word(self.id, GOAL_POSITION.address, wire)?;
        self.state.lock().position = Some(logical);
        Ok(())
    }

    pub fn set_goal_speed(&self, speed: i32) -> Result<(), HandError> {
        let (logical, wire) = self.admit_speed(speed)?;
        self.codec.write_word(self.id, GOAL_SPEED.address, wire)?;
        self.state.lock().speed = Some(logical);
        Ok(())
    }

    pub fn set_goal_acceleration(&self, acceleration: i32) -> Result<(), HandError> {
        let acc = self.admit("acceleration", acceleration, 0, ACCELERATION_MAX)?;
        self.codec
            .write_byte(self.id, ACCELERATION.address, acc as u8)?;
        self.state.lock().acceleration = Some(acc);
        Ok(())
    }

    pub fn set_goal_torque(&self, torque: i32) -> Result<(), HandError> {
        let t = self.admit("torque", torque, -GOAL_TORQUE_MAX, GOAL_TORQUE_MAX)?;
        self.codec
            .write_word(self.id, GOAL_TORQUE.address, t as i16)?;
        self.state.lock().torque = Some(t);
        Ok(())
    }

    pub fn set_torque_limit(&self, limit: i32) -> Result<(), HandError> {
        let l = self.admit("torque limit", limit, 0, TORQUE_LIMIT_MAX)?;
        self.codec
            .write_word(self.id, TORQUE_LIMIT.address, l as i16)
    }

    /// Speed, acceleration and torque (whichever are set), then position.
    /// Stops at the first failed write.
    pub fn apply_motion(&self, position: i32, profile: &MotionProfile) -> Result<(), HandError> {
        // Reject before touching the bus.
        self.admit_position(position)?;
        if let Some(s) = profile.speed {
            self.admit_speed(s)?;
        }
        if let Some(a) = profile.acceleration {
            self.admit("acceleration", a, 0, ACCELERATION_MAX)?;
        }
        if let Some(t) = profile.torque {
            self.admit("torque", t, -GOAL_TORQUE_MAX, GOAL_TORQUE_MAX)?;
        }
        if let Some(s) = profile.speed {
            self.set_goal_speed(s)?;
        }
        if let Some(a) = profile.acceleration {
            self.set_goal_acceleration(a)?;
        }
        if let Some(t) = profile.torque {
            self.set_goal_torque(t)?;
        }
        self.set_goal_position(position)
    }

    /// Validate a full motion command and encode it as one register block.
    pub fn prepare_motion(
        &self,
        position: i32,
        speed: i32,
        acceleration: i32,
        torque: i32,
    ) -> Result<PreparedMotion, HandError> {
        let (position, wire_pos) = self.admit_position(position)?;
        let (speed, wire_speed) = self.admit_speed(speed)?;
        let acceleration = self.admit("acceleration", acceleration, 0, ACCELERATION_MAX)?;
        let torque = self.admit("torque", torque, -GOAL_TORQUE_MAX, GOAL_TORQUE_MAX)?;

        let [pl, ph] = encode_word(wire_pos);
        let [tl, th] = encode_word(torque as i16);
        let [sl, sh] = encode_word(wire_speed);
        Ok(PreparedMotion {
            id: self.id,
            position,
            speed,
            acceleration,
            torque,
            block: [acceleration as u8, pl, ph, tl, th, sl, sh],
        })
    }

    /// Record a prepared motion as sent (after a successful batched write).
    pub fn commit_motion(&self, m: &PreparedMotion) {
        let mut st = self.state.lock();
        st.position = Some(m.position);
        st.speed = Some(m.speed);
        st.acceleration = Some(m.acceleration);
        st.torque = Some(m.torque);
    }

    pub fn read_present_position(&self) -> Option<i32> {
        let raw = self.read_word_logged(PRESENT_POSITION.address)?;
        Some(self.orient(i32::from(raw)))
    }

    pub fn read_present_speed(&self) -> Option<i32> {
        let raw = self.read_word_logged(PRESENT_SPEED.address)?;
        Some(self.orient(i32::from(raw)))
    }

    pub fn read_present_load(&self) -> Option<i32> {
        self.read_word_logged(PRESENT_LOAD.address).map(i32::from)
    }

    /// `(volts, degrees Celsius)`.
    pub fn read_voltage_temperature(&self) -> (Option<f64>, Option<f64>) {
        let v = self.read_byte_logged(PRESENT_VOLTAGE.address);
        let t = self.read_byte_logged(PRESENT_TEMPERATURE.address);
        (
            v.map(|raw| PRESENT_VOLTAGE.to_units(i32::from(raw))),
            t.map(|raw| PRESENT_TEMPERATURE.to_units(i32::from(raw))),
        )
    }

    pub fn read_feedback(&self) -> Feedback {
        let position = self.read_present_position();
        let speed = self.read_present_speed();
        let load = self.read_present_load();
        let (voltage, temperature) = self.read_voltage_temperature();
        let st = self.state.lock();
        Feedback {
            id: self.id,
            connected: st.connected,
            torque_enabled: st.torque_enabled,
            position,
            position_deg: position.map(registers::position_to_degrees),
            speed_rpm: speed.map(registers::speed_to_rpm),
            load_percent: load.map(|l| PRESENT_LOAD.to_units(l)),
            voltage,
            temperature,
        }
    }

    pub fn update_limits(&self, limits: Limits) -> Result<(), HandError> {
        let limits = Limits::new(limits.min, limits.max)?;
        self.state.lock().limits = limits;
        debug!(servo_id = self.id, min = limits.min, max = limits.max, "limits updated");
        Ok(())
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    fn orient(&self, value: i32) -> i32 {
        if self.state.lock().invert { -value } else { value }
    }

    /// Logical position within limits and its signed wire value.
    fn admit_position(&self, position: i32) -> Result<(i32, i16), HandError> {
        let Limits { min, max } = self.limits();
        let logical = self.admit("position", position, min, max)?;
        Ok((logical, saturate_word(self.orient(logical))))
    }

    fn admit_speed(&self, speed: i32) -> Result<(i32, i16), HandError> {
        let logical = self.admit("speed", speed, WORD_MIN, WORD_MAX)?;
        Ok((logical, saturate_word(self.orient(logical))))
    }

    fn admit(&self, what: &str, value: i32, lo: i32, hi: i32) -> Result<i32, HandError> {
        if (lo..=hi).contains(&value) {
            return Ok(value);
        }
        match self.limit_policy {
            LimitPolicy::Clamp => {
                let clamped = value.clamp(lo, hi);
                debug!(servo_id = self.id, what, value, clamped, "value clamped");
                Ok(clamped)
            }
            LimitPolicy::Reject => Err(HandError::Validation(format!(
                "servo {}: {what} {value} outside [{lo}, {hi}]",
                self.id
            ))),
        }
    }

    fn read_word_logged(&self, address: u8) -> Option<i16> {
        self.codec
            .read_word(self.id, address)
            .map_err(|e| debug!(servo_id = self.id, address, error = %e, "read failed"))
            .ok()
    }

    fn read_byte_logged(&self, address: u8) -> Option<u8> {
        self.codec
            .read_byte(self.id, address)
            .map_err(|e| debug!(servo_id = self.id, address, error = %e, "read failed"))
            .ok()
    }
}
