//! Serial Byte Transport
//!
//! This crate provides the lowest layer of the upyrepl stack: a raw byte
//! channel to a MicroPython board. It knows nothing about the REPL; it only
//! moves bytes and reports whether any are waiting.
//!
//! # Overview
//!
//! - [`Transport`] is the seam the protocol engine is written against. It exposes
//!   unframed writes and a read primitive that can be polled without blocking for
//!   longer than one read quantum.
//! - [`SerialTransport`] implements it on top of the `serialport` crate.
//! - [`available_ports`] and [`validate_port`] back the connection factory: a
//!   port is only opened if the OS currently reports it.
//!
//! # Example
//!
//! ```rust,ignore
//! use upyrepl_transport::{ConnectionConfig, SerialTransport, Transport};
//!
//! let mut transport = SerialTransport::open(ConnectionConfig::new("/dev/ttyUSB0"))?;
//! transport.write(b"\r\x03")?;
//! while let Some(byte) = transport.try_read_byte()? {
//!     print!("{}", byte as char);
//! }
//! transport.close()?;
//! ```

mod config;
mod error;
mod serial;

pub use config::*;
pub use error::*;
pub use serial::*;

/// A raw, unframed byte channel to a device.
///
/// Implementations must never block indefinitely in [`Transport::try_read_byte`];
/// the protocol engine builds all of its timeouts on top of that guarantee.
pub trait Transport: Send {
    /// Send raw bytes to the device.
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()>;

    /// Return the next received byte, or `None` if nothing is available right now.
    fn try_read_byte(&mut self) -> TransportResult<Option<u8>>;

    /// Drop everything currently buffered on the receive side.
    fn discard_input(&mut self) -> TransportResult<()>;

    /// Close the channel. Calling this more than once is not an error.
    fn close(&mut self) -> TransportResult<()>;

    /// Whether the channel is still open.
    fn is_open(&self) -> bool;

    /// Human readable name of the underlying port, used in log messages.
    fn name(&self) -> &str {
        "transport"
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        (**self).write(bytes)
    }

    fn try_read_byte(&mut self) -> TransportResult<Option<u8>> {
        (**self).try_read_byte()
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        (**self).discard_input()
    }

    fn close(&mut self) -> TransportResult<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
