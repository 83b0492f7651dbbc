pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::time::Duration;

/// Byte-level access to the shared half-duplex servo bus.
///
/// Implementations own the physical link (serial port, simulator, ...).
/// Callers are responsible for serializing request/response exchanges;
/// a `Transport` never interleaves on its own.
pub trait Transport {
    /// Write the whole buffer, returning the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Read up to `buf.len()` bytes, blocking at most `timeout`.
    /// Returns the number of bytes placed in `buf` (may be short).
    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Drop any pending input and output bytes.
    fn clear(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn is_open(&self) -> bool {
        true
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        (**self).write(bytes)
    }

    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(buf, timeout)
    }

    fn clear(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).clear()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
