//! Error types for the transport layer.

use thiserror::Error;

/// Errors that can occur while opening or using a serial connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The requested port is not among the ports the OS currently reports.
    #[error("port {port} is not available (available: {})", format_ports(.available))]
    PortUnavailable {
        /// Requested port name.
        port: String,
        /// Ports that were available at the time of the request.
        available: Vec<String>,
    },

    /// Listing the system's serial ports failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(String),

    /// The OS refused to open the port.
    #[error("failed to open {port}: {reason}")]
    Open {
        /// Port name.
        port: String,
        /// Reason reported by the OS.
        reason: String,
    },

    /// I/O error while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has already been closed.
    #[error("transport is closed")]
    Closed,
}

fn format_ports(ports: &[String]) -> String {
    if ports.is_empty() {
        "none".to_string()
    } else {
        ports.join(", ")
    }
}

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
