//! Connection parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default baud rate used by MicroPython firmware on its USB/UART console.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read quantum in milliseconds.
pub const DEFAULT_READ_QUANTUM_MS: u64 = 1;

/// Parameters for opening a serial connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port identifier (`/dev/ttyUSB0`, `COM3`, ...).
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Longest time a single poll of the port may block, in milliseconds.
    pub read_quantum_ms: u64,
}

impl ConnectionConfig {
    /// Create a configuration for `port` with default baud rate and quantum.
    pub fn new(port: impl Into<String>) -> Self {
        ConnectionConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// The read quantum as a [`Duration`]. Never zero.
    pub fn read_quantum(&self) -> Duration {
        Duration::from_millis(self.read_quantum_ms.max(1))
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_quantum_ms: DEFAULT_READ_QUANTUM_MS,
        }
    }
}
