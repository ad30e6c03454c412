//! Serial-port transport backed by the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

use serde::Serialize;
use serialport::{ClearBuffer, SerialPort, SerialPortType};

use crate::config::SerialParams;
use crate::error::Result;
use crate::transport::{Connector, Transport};

/// Opens real serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Link = SerialLink;

    fn open(&mut self, port: &str, params: &SerialParams) -> io::Result<SerialLink> {
        let inner = serialport::new(port, params.baud_rate)
            .data_bits(params.data_bits)
            .parity(params.parity)
            .stop_bits(params.stop_bits)
            .flow_control(params.flow_control)
            .open()?;
        tracing::debug!(port, baud = params.baud_rate, "serial port opened");
        Ok(SerialLink {
            name: port.to_owned(),
            inner: Some(inner),
        })
    }
}

/// An open serial device.
///
/// Dropping the link closes the device as well.
pub struct SerialLink {
    /// Device name, for logs.
    name: String,
    /// Open device; `None` once closed.
    inner: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.name)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl SerialLink {
    /// Returns the open device or `NotConnected` after close.
    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Transport for SerialLink {
    fn read_up_to(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            // A zero-length read on a tty means the device went away.
            Ok(0) if !buf.is_empty() => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.port()?.clear(ClearBuffer::Input)?)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.inner.take().is_some() {
            tracing::debug!(port = %self.name, "serial port closed");
        }
        Ok(())
    }
}

/// A serial device present on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PortInfo {
    /// Device name to pass to a session (e.g. `/dev/ttyUSB0`, `COM3`).
    pub name: String,
    /// Human description of the device.
    pub description: String,
}

/// Lists serial devices present on the host, sorted by name.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()?
        .into_iter()
        .map(|p| PortInfo {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

/// Formats a port type for display.
fn describe(kind: &SerialPortType) -> String {
    match kind {
        SerialPortType::UsbPort(usb) => {
            let mut s = format!("USB {:04x}:{:04x}", usb.vid, usb.pid);
            if let Some(product) = usb.product.as_deref().or(usb.manufacturer.as_deref()) {
                s.push(' ');
                s.push_str(product);
            }
            s
        }
        SerialPortType::PciPort => "PCI".to_owned(),
        SerialPortType::BluetoothPort => "Bluetooth".to_owned(),
        _ => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_missing_device_fails() {
        let err = SerialConnector
            .open("/nonexistent/musload-tty", &SerialParams::default())
            .unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn pci_description() {
        assert_eq!(describe(&SerialPortType::PciPort), "PCI");
    }
}
