//! Delimiter scanning for raw REPL output.
//!
//! Everything the device sends in raw mode is delimited: the banner, the `OK`
//! acknowledgement and the two output sections (each ended by [`EOT`]). The
//! [`DelimiterScanner`] accumulates bytes until its token is seen.
//!
//! A bare [`EOT`] seen while scanning for some *other* token ends the scan early
//! (the EOT itself is not kept). A device that answers with less than expected,
//! for example an error section where an acknowledgement was due, still ends the
//! read promptly instead of running into the timeout.

use bytes::BytesMut;

use crate::EOT;

/// The bytes collected before a delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimited {
    /// Bytes received before the token (token excluded).
    pub body: Vec<u8>,
    /// True if the scan was ended by a bare EOT rather than the token.
    pub truncated: bool,
}

/// Accumulates received bytes until a terminator token is seen.
#[derive(Debug)]
pub struct DelimiterScanner {
    token: Vec<u8>,
    buffer: BytesMut,
}

impl DelimiterScanner {
    /// Create a scanner for `token`. An empty token matches immediately.
    pub fn new(token: &[u8]) -> Self {
        DelimiterScanner {
            token: token.to_vec(),
            buffer: BytesMut::with_capacity(128),
        }
    }

    /// Feed one received byte.
    ///
    /// Returns `Some` once the token (or a truncating EOT) has been seen; the
    /// scanner is then empty and can be reused for the same token.
    pub fn push(&mut self, byte: u8) -> Option<Delimited> {
        if byte == EOT && !self.token.contains(&EOT) {
            let body = self.buffer.split().to_vec();
            return Some(Delimited { body, truncated: true });
        }

        self.buffer.extend_from_slice(&[byte]);
        if self.buffer.ends_with(&self.token) {
            let mut body = self.buffer.split().to_vec();
            body.truncate(body.len() - self.token.len());
            return Some(Delimited { body, truncated: false });
        }
        None
    }

    /// Bytes accumulated so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Encode a command for submission: the source text followed by EOT.
    pub fn encode_command(command: &str) -> Vec<u8> {
        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(EOT);
        frame
    }
}
