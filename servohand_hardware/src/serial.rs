use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use servohand_traits::Transport;
use tracing::{debug, info, warn};

use crate::error::{HwError, Result};
use crate::util::read_with_deadline;

/// USB/TTL serial link to the servo bus (8N1).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    open: bool,
}

impl SerialTransport {
    pub fn open(path: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(|e| HwError::PortUnavailable(format!("{path}: {e}")))?;
        let mut link = Self {
            port,
            name: path.to_string(),
            open: true,
        };
        if let Err(e) = link.port.clear(ClearBuffer::All) {
            warn!(port = path, error = %e, "initial buffer clear failed");
        }
        info!(port = path, baudrate, "serial bus opened");
        Ok(link)
    }

    /// Names of the serial ports visible to the OS.
    pub fn list_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(|e| HwError::Serial(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn mark_closed(&mut self, e: &std::io::Error) {
        if matches!(
            e.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected
        ) {
            warn!(port = %self.name, error = %e, "serial link lost");
            self.open = false;
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> std::result::Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        if !self.open {
            return Err(Box::new(HwError::Closed));
        }
        let res = self.port.write_all(bytes).and_then(|()| self.port.flush());
        if let Err(e) = res {
            self.mark_closed(&e);
            return Err(Box::new(HwError::Io(e)));
        }
        Ok(bytes.len())
    }

    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        if !self.open {
            return Err(Box::new(HwError::Closed));
        }
        let port = &mut self.port;
        let n = read_with_deadline(
            |chunk| port.read(chunk),
            buf,
            timeout,
            Duration::from_micros(200),
        )?;
        debug!(port = %self.name, bytes = n, "serial read");
        Ok(n)
    }

    fn clear(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.open {
            return Err(Box::new(HwError::Closed));
        }
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| HwError::Serial(e.to_string()).into())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
