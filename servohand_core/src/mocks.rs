//! Test and helper mocks for servohand_core

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MotionProfile;
use crate::manager::HandControl;
use crate::servo_map::ServoMap;

/// A transport whose every write times out. Counts write attempts.
#[derive(Debug, Default, Clone)]
pub struct DeadTransport {
    attempts: Arc<Mutex<usize>>,
}

impl DeadTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of `write` calls.
    pub fn attempts(&self) -> Arc<Mutex<usize>> {
        self.attempts.clone()
    }
}

impl servohand_traits::Transport for DeadTransport {
    fn write(&mut self, _bytes: &[u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        *self.attempts.lock() += 1;
        Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write timed out",
        )))
    }

    fn read(
        &mut self,
        _buf: &mut [u8],
        _timeout: std::time::Duration,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read timed out",
        )))
    }

    fn clear(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// One `send_positions` call seen by [`ScriptedHand`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub targets: ServoMap<i32>,
    pub profile: MotionProfile,
}

/// A hand that replays queued position readings and records every
/// command sent to it.
#[derive(Debug, Default)]
pub struct ScriptedHand {
    readings: Mutex<Vec<ServoMap<Option<i32>>>>,
    sent: Mutex<Vec<SentCommand>>,
    torque_calls: Mutex<usize>,
}

impl ScriptedHand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readings returned in order; the last one repeats once the queue drains.
    pub fn push_reading(&self, reading: ServoMap<Option<i32>>) {
        self.readings.lock().push(reading);
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn torque_calls(&self) -> usize {
        *self.torque_calls.lock()
    }
}

impl HandControl for ScriptedHand {
    fn read_positions(&self) -> ServoMap<Option<i32>> {
        let mut q = self.readings.lock();
        match q.len() {
            0 => ServoMap::new(),
            1 => q[0].clone(),
            _ => q.remove(0),
        }
    }

    fn send_positions(&self, targets: &ServoMap<i32>, profile: &MotionProfile) -> ServoMap<bool> {
        self.sent.lock().push(SentCommand {
            targets: targets.clone(),
            profile: *profile,
        });
        targets.map(|_, _| true)
    }

    fn enable_torque(&self) -> ServoMap<bool> {
        *self.torque_calls.lock() += 1;
        ServoMap::new()
    }
}
