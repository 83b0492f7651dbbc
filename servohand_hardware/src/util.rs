use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Fill `buf` from `read_some` until it is full or `timeout` expires.
///
/// Returns the number of bytes collected. A partial fill is not an error;
/// only "nothing at all before the deadline" is reported as `Timeout`.
/// Sleeps `poll_interval` between empty reads to avoid CPU spinning.
pub fn read_with_deadline(
    mut read_some: impl FnMut(&mut [u8]) -> std::io::Result<usize>,
    buf: &mut [u8],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<usize> {
    let deadline = Instant::now() + timeout;
    let mut filled = 0;
    while filled < buf.len() {
        match read_some(&mut buf[filled..]) {
            Ok(0) => {}
            Ok(n) => {
                filled += n;
                continue;
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(HwError::Io(e)),
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(poll_interval);
    }
    if filled == 0 && !buf.is_empty() {
        return Err(HwError::Timeout);
    }
    Ok(filled)
}
