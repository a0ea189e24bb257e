//! # USB Serial Transport
//!
//! Communication with da Vinci printers over their USB CDC serial interface.
//!
//! ## Line Settings
//!
//! The V3 firmware expects a raw 8N1 link at a fixed 115200 baud with no flow
//! control. Binary upload blocks pass through untouched, so the port must not
//! translate CR/LF or honour XON/XOFF.
//!
//! ## Exclusive Access
//!
//! The OS allows one open handle per port; a second open fails with
//! [`TransportError::PortBusy`].
//!
//! ## Chunked Writes
//!
//! Large writes (upload blocks) are split into chunks so a slow USB bridge
//! never sees one oversized write call.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use super::Transport;
use crate::error::TransportError;
use crate::protocol::BAUD_RATE;

/// Default chunk size for writes (bytes)
const CHUNK_SIZE: usize = 4096;

/// Pause after opening so the printer's USB bridge settles.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default bound on a single write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// # Serial Printer Transport
///
/// ## Example
///
/// ```no_run
/// use std::time::Duration;
/// use vinci::transport::{SerialTransport, Transport};
///
/// let mut link = SerialTransport::open("/dev/ttyACM0")?;
/// link.write_all(b"XYZv3/query=a\n")?;
/// let reply = link.read(4096, Duration::from_secs(5))?;
/// # Ok::<(), vinci::error::TransportError>(())
/// ```
pub struct SerialTransport {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
    /// Reason the link died, if it did.
    dead: Option<String>,
    write_timeout: Duration,
    chunk_size: usize,
}

impl SerialTransport {
    /// Open a serial connection to the printer.
    ///
    /// ## Errors
    ///
    /// - [`TransportError::PortBusy`] if another process holds the port
    /// - [`TransportError::Unavailable`] if the port doesn't exist or
    ///   permission is denied (may need the dialout group)
    pub fn open(port: &str) -> Result<Self, TransportError> {
        let handle = open_port(port, DEFAULT_WRITE_TIMEOUT)?;
        info!(port, baud = BAUD_RATE, "serial port opened");
        Ok(Self {
            port_name: port.to_string(),
            port: Some(handle),
            dead: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            chunk_size: CHUNK_SIZE,
        })
    }

    /// Set the bound on each write call.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Set the chunk size for large writes.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.max(1);
    }

    /// Close and open the port again, clearing a dead state.
    pub fn reopen(&mut self) -> Result<(), TransportError> {
        self.port = None;
        self.port = Some(open_port(&self.port_name, self.write_timeout)?);
        self.dead = None;
        info!(port = %self.port_name, "serial port reopened");
        Ok(())
    }

    /// Whether a previous failure killed the link.
    pub fn is_dead(&self) -> bool {
        self.dead.is_some()
    }

    fn live_port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        if let Some(reason) = &self.dead {
            return Err(TransportError::Dead(reason.clone()));
        }
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    fn mark_dead(&mut self, err: io::Error) -> TransportError {
        warn!(port = %self.port_name, error = %err, "serial link failed");
        self.dead = Some(err.to_string());
        TransportError::Io(err)
    }

    /// Mark the link dead for a failure that is not an I/O error.
    fn kill(&mut self, reason: String) -> TransportError {
        warn!(port = %self.port_name, %reason, "serial link failed");
        self.dead = Some(reason.clone());
        TransportError::Dead(reason)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.live_port()?;
        if let Err(e) = port.set_timeout(timeout) {
            return Err(self.kill(format!("set_timeout failed: {}", e)));
        }

        let mut buf = vec![0u8; max_bytes.max(1)];
        let result = loop {
            match port.read(&mut buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match result {
            Ok(0) => Err(TransportError::Timeout(timeout)),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(TransportError::Timeout(timeout)),
            Err(e) => Err(self.mark_dead(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let write_timeout = self.write_timeout;
        let chunk_size = self.chunk_size;
        let port = self.live_port()?;
        if let Err(e) = port.set_timeout(write_timeout) {
            return Err(self.kill(format!("set_timeout failed: {}", e)));
        }

        let mut result = Ok(());
        for chunk in data.chunks(chunk_size) {
            if let Err(e) = port.write_all(chunk) {
                result = Err(e);
                break;
            }
        }
        let result = result.and_then(|()| port.flush());

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(TransportError::Timeout(write_timeout))
            }
            Err(e) => Err(self.mark_dead(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open and configure a port for raw 8N1 at the V3 baud rate.
fn open_port(port: &str, timeout: Duration) -> Result<Box<dyn SerialPort>, TransportError> {
    let handle = serialport::new(port, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| classify_open_error(port, e))?;

    thread::sleep(SETTLE_DELAY);
    if let Err(e) = handle.clear(ClearBuffer::All) {
        debug!(port, error = %e, "could not clear port buffers");
    }
    Ok(handle)
}

fn classify_open_error(port: &str, err: serialport::Error) -> TransportError {
    let detail = err.to_string();
    let lower = detail.to_lowercase();
    let busy = matches!(err.kind(), serialport::ErrorKind::Io(io::ErrorKind::ResourceBusy))
        || lower.contains("busy")
        || lower.contains("access is denied")
        || lower.contains("in use");
    if busy {
        TransportError::PortBusy {
            port: port.to_string(),
            detail,
        }
    } else {
        TransportError::Unavailable {
            port: port.to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_classification() {
        let err = serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "Device or resource busy",
        );
        assert!(matches!(
            classify_open_error("/dev/ttyACM0", err),
            TransportError::PortBusy { .. }
        ));
    }

    #[test]
    fn test_missing_port() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "No such file or directory");
        assert!(matches!(
            classify_open_error("/dev/ttyACM9", err),
            TransportError::Unavailable { .. }
        ));
    }

    #[test]
    fn test_open_nonexistent_port_fails() {
        assert!(SerialTransport::open("/dev/vinci-does-not-exist").is_err());
    }

    #[test]
    fn test_failure_makes_later_calls_fail_fast() {
        let mut transport = SerialTransport {
            port_name: "/dev/ttyACM0".to_string(),
            port: None,
            dead: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            chunk_size: CHUNK_SIZE,
        };
        let err = transport.kill("set_timeout failed: gone".to_string());
        assert!(matches!(err, TransportError::Dead(_)));
        assert!(transport.is_dead());
        assert!(matches!(
            transport.read(16, Duration::from_millis(1)),
            Err(TransportError::Dead(_))
        ));
        assert!(matches!(transport.write_all(b"x"), Err(TransportError::Dead(_))));
    }

    // Most transport tests require actual hardware; protocol-level behaviour
    // is covered against the simulated printer.
}
