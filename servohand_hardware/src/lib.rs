pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod sim;
pub mod util;

#[cfg(feature = "hardware")]
pub use serial::SerialTransport;
pub use sim::{SimHandle, SimulatedBus};

/// Number of servos wired on the hand bus.
pub const HAND_SERVO_COUNT: u8 = 17;

/// Simulated hand with all 17 servos online.
pub fn simulated_hand() -> (SimulatedBus, SimHandle) {
    SimulatedBus::with_servos(HAND_SERVO_COUNT)
}
