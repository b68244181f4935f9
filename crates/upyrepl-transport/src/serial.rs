//! `serialport`-backed transport.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use log::{debug, trace, warn};
use serialport::{ClearBuffer, SerialPort};

use crate::{ConnectionConfig, Transport, TransportError, TransportResult};

/// Number of bytes pulled from the OS per poll.
const READ_CHUNK: usize = 256;

/// List the names of the serial ports currently reported by the OS.
pub fn available_ports() -> TransportResult<Vec<String>> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .map_err(|e| TransportError::Enumerate(e.to_string()))
}

/// Check that `port` is one of the `available` ports.
pub fn validate_port(port: &str, available: &[String]) -> TransportResult<()> {
    if available.iter().any(|p| p == port) {
        Ok(())
    } else {
        Err(TransportError::PortUnavailable {
            port: port.to_string(),
            available: available.to_vec(),
        })
    }
}

/// A [`Transport`] over a real serial port.
///
/// Bytes are read from the OS in blocks into an internal buffer and handed out
/// one at a time. An OS read timeout (one read quantum) means "no data now".
pub struct SerialTransport {
    config: ConnectionConfig,
    port: Option<Box<dyn SerialPort>>,
    pending: BytesMut,
}

impl SerialTransport {
    /// Open the port described by `config`, refusing ports the OS does not list.
    pub fn open(config: ConnectionConfig) -> TransportResult<Self> {
        let available = available_ports()?;
        validate_port(&config.port, &available)?;

        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.read_quantum())
            .open()
            .map_err(|e| TransportError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "SerialTransport[{}]: opened at {} baud (quantum {}ms)",
            config.port, config.baud_rate, config.read_quantum_ms
        );

        Ok(SerialTransport {
            config,
            port: Some(port),
            pending: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    fn port_mut(&mut self) -> TransportResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    /// Pull whatever the OS has (waiting at most one quantum) into `pending`.
    fn fill(&mut self) -> TransportResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let port = self.port_mut()?;
        match port.read(&mut chunk) {
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        trace!("SerialTransport[{}]: tx {}", self.config.port, hex::encode(bytes));
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn try_read_byte(&mut self) -> TransportResult<Option<u8>> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.pending.get_u8()))
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        let dropped = self.pending.len();
        self.pending.clear();
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.into()))?;
        trace!("SerialTransport[{}]: discarded {} buffered bytes", self.config.port, dropped);
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush() {
                warn!("SerialTransport[{}]: flush on close failed: {}", self.config.port, e);
            }
            debug!("SerialTransport[{}]: closed", self.config.port);
        }
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn name(&self) -> &str {
        &self.config.port
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port_accepts_listed_port() {
        let available = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyACM0".to_string()];
        assert!(validate_port("/dev/ttyACM0", &available).is_ok());
    }

    #[test]
    fn test_validate_port_rejects_unknown_port() {
        let available = vec!["COM1".to_string()];
        let err = validate_port("COM7", &available).unwrap_err();
        match err {
            TransportError::PortUnavailable { port, available } => {
                assert_eq!(port, "COM7");
                assert_eq!(available, vec!["COM1".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_port_unavailable_message_lists_ports() {
        let err = validate_port("COM7", &[]).unwrap_err();
        assert_eq!(err.to_string(), "port COM7 is not available (available: none)");
    }
}
