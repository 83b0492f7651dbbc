//! Control-table addresses and engineering units of the hand's servos.
//!
//! Multi-byte registers are little-endian words in sign-magnitude form
//! (bit 15 carries the sign, see [`crate::protocol::encode_word`]).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    pub const fn len(self) -> u8 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
        }
    }
}

/// One control-table entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Register {
    pub name: &'static str,
    pub address: u8,
    pub width: Width,
    /// Engineering units per raw count (0.0 when the register is unitless).
    pub unit: f64,
}

impl Register {
    pub fn to_units(&self, raw: i32) -> f64 {
        f64::from(raw) * self.unit
    }
}

const fn reg(name: &'static str, address: u8, width: Width, unit: f64) -> Register {
    Register {
        name,
        address,
        width,
        unit,
    }
}

pub const TORQUE_SWITCH: Register = reg("torque_switch", 40, Width::Byte, 0.0);
/// 8.7 deg/s^2 per count.
pub const ACCELERATION: Register = reg("acceleration", 41, Width::Byte, 8.7);
/// 0.087 deg per count.
pub const GOAL_POSITION: Register = reg("goal_position", 42, Width::Word, 0.087);
/// 6.5 mA per count.
pub const GOAL_TORQUE: Register = reg("goal_torque", 44, Width::Word, 6.5);
/// 0.732 RPM per count.
pub const GOAL_SPEED: Register = reg("goal_speed", 46, Width::Word, 0.732);
/// Percent of rated torque.
pub const TORQUE_LIMIT: Register = reg("torque_limit", 48, Width::Word, 0.1);

pub const PRESENT_POSITION: Register = reg("present_position", 56, Width::Word, 0.087);
pub const PRESENT_SPEED: Register = reg("present_speed", 58, Width::Word, 0.732);
/// 0.1 % per count.
pub const PRESENT_LOAD: Register = reg("present_load", 60, Width::Word, 0.1);
/// 0.1 V per count.
pub const PRESENT_VOLTAGE: Register = reg("present_voltage", 62, Width::Byte, 0.1);
/// Degrees Celsius.
pub const PRESENT_TEMPERATURE: Register = reg("present_temperature", 63, Width::Byte, 1.0);

/// Acceleration through goal speed form one contiguous block
/// `[acc, pos_l, pos_h, torque_l, torque_h, speed_l, speed_h]`.
pub const MOTION_BLOCK_START: u8 = ACCELERATION.address;
pub const MOTION_BLOCK_LEN: u8 = 7;

pub const WORD_MIN: i32 = -32767;
pub const WORD_MAX: i32 = 32767;
pub const ACCELERATION_MAX: i32 = 254;
pub const GOAL_TORQUE_MAX: i32 = 2047;
pub const TORQUE_LIMIT_MAX: i32 = 1000;

/// Values of the torque switch register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TorqueMode {
    Off = 0,
    On = 1,
    /// Motor shorted through its driver: resists motion without holding.
    Damping = 2,
}

impl From<TorqueMode> for u8 {
    fn from(m: TorqueMode) -> u8 {
        m as u8
    }
}

/// Raw position counts to degrees.
pub fn position_to_degrees(raw: i32) -> f64 {
    GOAL_POSITION.to_units(raw)
}

/// Degrees to the nearest raw position count.
pub fn degrees_to_position(degrees: f64) -> i32 {
    let raw = (degrees / GOAL_POSITION.unit).round();
    raw.clamp(f64::from(WORD_MIN), f64::from(WORD_MAX)) as i32
}

pub fn speed_to_rpm(raw: i32) -> f64 {
    GOAL_SPEED.to_units(raw)
}

pub fn torque_to_milliamps(raw: i32) -> f64 {
    GOAL_TORQUE.to_units(raw)
}

pub fn acceleration_to_deg_s2(raw: i32) -> f64 {
    ACCELERATION.to_units(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_block_is_contiguous() {
        let end = GOAL_SPEED.address + GOAL_SPEED.width.len();
        assert_eq!(end - MOTION_BLOCK_START, MOTION_BLOCK_LEN);
        assert_eq!(GOAL_POSITION.address, MOTION_BLOCK_START + 1);
        assert_eq!(GOAL_TORQUE.address, MOTION_BLOCK_START + 3);
    }

    #[test]
    fn degrees_round_trip_within_one_count() {
        let raw = degrees_to_position(90.0);
        assert_eq!(raw, 1034);
        assert!((position_to_degrees(raw) - 90.0).abs() < GOAL_POSITION.unit);
    }

    #[test]
    fn degrees_saturate_at_word_range() {
        assert_eq!(degrees_to_position(1.0e9), WORD_MAX);
        assert_eq!(degrees_to_position(-1.0e9), WORD_MIN);
    }
}
