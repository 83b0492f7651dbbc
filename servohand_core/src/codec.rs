//! Register-level access to servos over one shared half-duplex bus.
//!
//! Every exchange holds the bus lock from the first byte sent to the last
//! byte received, so concurrent callers (manager batches, calibration,
//! monitor and recorder threads) never interleave on the wire.

use std::sync::Arc;

use parking_lot::Mutex;
use servohand_traits::{Clock, Transport};
use tracing::{debug, trace, warn};

use crate::config::BusTiming;
use crate::error::{HandError, ProtocolError};
use crate::hw_error::map_hw_error;
use crate::protocol::{self, FRAME_OVERHEAD, decode_word, encode_word};

pub type BoxedTransport = Box<dyn Transport + Send>;
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

pub struct ProtocolCodec {
    bus: Mutex<BoxedTransport>,
    clock: SharedClock,
    timing: BusTiming,
}

impl std::fmt::Debug for ProtocolCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCodec")
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl ProtocolCodec {
    pub fn new(transport: BoxedTransport, clock: SharedClock, timing: BusTiming) -> Self {
        Self {
            bus: Mutex::new(transport),
            clock,
            timing,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn timing(&self) -> &BusTiming {
        &self.timing
    }

    /// False once the transport reported unrecoverable loss of the link.
    pub fn is_open(&self) -> bool {
        self.bus.lock().is_open()
    }

    pub fn write_byte(&self, id: u8, address: u8, value: u8) -> Result<(), HandError> {
        self.write_block(id, address, &[value])
    }

    pub fn write_word(&self, id: u8, address: u8, value: i16) -> Result<(), HandError> {
        self.write_block(id, address, &encode_word(value))
    }

    /// Write consecutive registers starting at `address` in one packet.
    pub fn write_block(&self, id: u8, address: u8, data: &[u8]) -> Result<(), HandError> {
        let packet = protocol::write_packet(id, address, data)?;
        self.with_retries(id, address, |bus| self.send(bus, &packet))
    }

    pub fn read_byte(&self, id: u8, address: u8) -> Result<u8, HandError> {
        let data = self.read_block(id, address, 1)?;
        Ok(data[0])
    }

    pub fn read_word(&self, id: u8, address: u8) -> Result<i16, HandError> {
        let data = self.read_block(id, address, 2)?;
        Ok(decode_word([data[0], data[1]]))
    }

    /// Read `count` consecutive registers; the returned vec has exactly `count` bytes.
    pub fn read_block(&self, id: u8, address: u8, count: u8) -> Result<Vec<u8>, HandError> {
        let packet = protocol::read_packet(id, address, count)?;
        let expected = FRAME_OVERHEAD + usize::from(count);
        self.with_retries(id, address, |bus| {
            self.send(bus, &packet)?;
            self.clock.sleep(self.timing.response_latency);
            let mut buf = vec![0u8; expected];
            let got = bus
                .read(&mut buf, self.timing.read_timeout)
                .map_err(|e| map_hw_error(&*e))?;
            let status = protocol::parse_status(&buf[..got], id, usize::from(count))?;
            if status.error != 0 {
                debug!(servo_id = id, flags = status.error, "servo reported error flags");
            }
            Ok(status.data.to_vec())
        })
    }

    /// Broadcast one register block to several servos; no replies are expected.
    pub fn sync_write(
        &self,
        address: u8,
        data_len: u8,
        entries: &[(u8, &[u8])],
    ) -> Result<(), HandError> {
        let packet = protocol::sync_write_packet(address, data_len, entries)?;
        self.with_retries(protocol::BROADCAST_ID, address, |bus| {
            self.send(bus, &packet)
        })
    }

    fn send(&self, bus: &mut BoxedTransport, packet: &[u8]) -> Result<(), HandError> {
        if let Err(e) = bus.clear() {
            trace!(error = %e, "clearing bus buffers failed");
        }
        let n = bus.write(packet).map_err(|e| map_hw_error(&*e))?;
        if n != packet.len() {
            return Err(ProtocolError::ShortResponse {
                expected: packet.len(),
                got: n,
            }
            .into());
        }
        self.clock.sleep(self.timing.settle);
        Ok(())
    }

    /// Run `exchange` under the bus lock up to `timing.attempts` times.
    fn with_retries<T>(
        &self,
        id: u8,
        address: u8,
        mut exchange: impl FnMut(&mut BoxedTransport) -> Result<T, HandError>,
    ) -> Result<T, HandError> {
        let attempts = self.timing.attempts.max(1);
        let mut bus = self.bus.lock();
        let mut last = HandError::Protocol(ProtocolError::Timeout);
        for attempt in 1..=attempts {
            if !bus.is_open() {
                return Err(HandError::Transport("bus closed".into()));
            }
            match exchange(&mut bus) {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    trace!(servo_id = id, address, attempt, error = %e, "bus exchange failed");
                    last = e;
                }
            }
        }
        warn!(servo_id = id, address, attempts, error = %last, "bus exchange gave up");
        Err(last)
    }
}
