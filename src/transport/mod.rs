//! # Printer Transport Layer
//!
//! Raw byte movement between the host and a printer. Transports know nothing
//! about frames; they read and write bytes with bounded timeouts.
//!
//! ## Available Transports
//!
//! - [`serial`]: USB CDC serial port at 115200 baud
//! - [`sim`]: Scriptable in-memory printer for tests and dry runs
//!
//! ## Failure Model
//!
//! A read or write error (other than a timeout) marks the transport dead;
//! every later call fails fast until it is reopened.

pub mod serial;
pub mod sim;

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::TransportError;

pub use serial::SerialTransport;
pub use sim::{SimHandle, SimulatedPrinter};

/// USB vendor ID used by XYZprinting.
pub const XYZ_VID: u16 = 0x28E7;

/// USB product IDs of known V3 printers (miniMaker, Jr, Pro).
pub const XYZ_PIDS: &[u16] = &[0x0301, 0x0100, 0x0200];

/// A bidirectional byte link to one printer.
pub trait Transport: Send {
    /// Read at most `max_bytes`, waiting no longer than `timeout`.
    ///
    /// Returns at least one byte, or [`TransportError::Timeout`].
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the link. Idempotent.
    fn close(&mut self);

    /// Human-readable endpoint name (port path).
    fn name(&self) -> &str;
}

/// A serial port visible to the host.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub port: String,
    pub description: String,
    /// Whether the port looks like a da Vinci printer.
    pub likely_printer: bool,
}

/// List serial ports, likely printers first.
///
/// Ports are flagged by USB vendor/product ID or by description keywords.
/// When nothing looks like a printer, every port is returned unflagged.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::Unavailable {
        port: "*".to_string(),
        detail: format!("failed to enumerate ports: {}", e),
    })?;

    let mut infos: Vec<PortInfo> = ports
        .into_iter()
        // On macOS only the cu.* (calling unit) devices are usable for outgoing links
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let product = usb.product.clone().unwrap_or_else(|| p.port_name.clone());
                let desc = if usb.vid == XYZ_VID && XYZ_PIDS.contains(&usb.pid) {
                    format!("XYZ Printer ({})", product)
                } else {
                    product
                };
                let likely = is_likely_printer(Some((usb.vid, usb.pid)), &desc);
                PortInfo {
                    description: format!("{} (USB {:04x}:{:04x})", desc, usb.vid, usb.pid),
                    port: p.port_name,
                    likely_printer: likely,
                }
            }
            _ => PortInfo {
                description: p.port_name.clone(),
                likely_printer: is_likely_printer(None, &p.port_name),
                port: p.port_name,
            },
        })
        .collect();

    if !infos.iter().any(|p| p.likely_printer) {
        warn!("no port looks like a da Vinci printer; listing all {}", infos.len());
    }
    infos.sort_by_key(|p| !p.likely_printer);
    Ok(infos)
}

/// Heuristic used by [`list_ports`].
pub fn is_likely_printer(usb: Option<(u16, u16)>, description: &str) -> bool {
    if let Some((vid, _pid)) = usb
        && vid == XYZ_VID
    {
        return true;
    }
    let desc = description.to_lowercase();
    ["xyz", "davinci", "da vinci"]
        .iter()
        .any(|kw| desc.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vid_match() {
        assert!(is_likely_printer(Some((XYZ_VID, 0x0301)), "USB Serial"));
        assert!(is_likely_printer(Some((XYZ_VID, 0x9999)), ""));
        assert!(!is_likely_printer(Some((0x2341, 0x0043)), "Arduino Uno"));
    }

    #[test]
    fn test_keyword_match() {
        assert!(is_likely_printer(None, "XYZprinting da Vinci mini"));
        assert!(is_likely_printer(None, "DaVinci CDC"));
        assert!(!is_likely_printer(None, "/dev/ttyS0"));
    }
}
