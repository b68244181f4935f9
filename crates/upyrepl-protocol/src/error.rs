//! Error types for the raw REPL protocol.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use upyrepl_transport::TransportError;

use crate::SessionState;

/// Errors that can occur while driving the raw REPL.
#[derive(Debug, Error)]
pub enum ReplError {
    /// The underlying byte channel failed or is closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A terminator was not observed within the idle budget.
    #[error("timed out after {}ms waiting for {waiting_for}", .after.as_millis())]
    Timeout {
        /// What was being waited for.
        waiting_for: String,
        /// The idle budget that ran out.
        after: Duration,
    },

    /// The device raised an exception while running the command.
    #[error("remote execution failed: {0}")]
    RemoteExecution(RemoteError),

    /// The operation is not valid in the engine's current session state.
    #[error("cannot {operation} while session is {state}")]
    ProtocolState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the engine was in.
        state: SessionState,
    },

    /// The background streaming worker could not be started.
    #[error("failed to start streaming worker: {0}")]
    Spawn(std::io::Error),

    /// The background streaming worker panicked.
    #[error("streaming worker panicked")]
    WorkerPanicked,
}

impl ReplError {
    /// The remote error, if this is a [`ReplError::RemoteExecution`].
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ReplError::RemoteExecution(remote) => Some(remote),
            _ => None,
        }
    }

    /// Whether this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReplError::Timeout { .. })
    }
}

/// Result type alias for raw REPL operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Classification of a device-side exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// `ENOENT`.
    NotFound,
    /// `ENOTDIR`.
    NotADirectory,
    /// `EEXIST`.
    AlreadyExists,
    /// `EISDIR`.
    IsADirectory,
    /// `ENOTEMPTY`.
    NotEmpty,
    /// `EACCES` / `EPERM`.
    PermissionDenied,
    /// `KeyboardInterrupt`.
    Interrupted,
    /// Anything else.
    Other,
}

impl RemoteErrorKind {
    fn from_errno(code: u32) -> Self {
        match code {
            2 => RemoteErrorKind::NotFound,
            20 => RemoteErrorKind::NotADirectory,
            17 => RemoteErrorKind::AlreadyExists,
            21 => RemoteErrorKind::IsADirectory,
            39 => RemoteErrorKind::NotEmpty,
            1 | 13 => RemoteErrorKind::PermissionDenied,
            _ => RemoteErrorKind::Other,
        }
    }

    fn from_errno_name(name: &str) -> Option<Self> {
        let kind = match name {
            "ENOENT" => RemoteErrorKind::NotFound,
            "ENOTDIR" => RemoteErrorKind::NotADirectory,
            "EEXIST" => RemoteErrorKind::AlreadyExists,
            "EISDIR" => RemoteErrorKind::IsADirectory,
            "ENOTEMPTY" => RemoteErrorKind::NotEmpty,
            "EACCES" | "EPERM" => RemoteErrorKind::PermissionDenied,
            _ => return None,
        };
        Some(kind)
    }
}

/// Error text reported by the device, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    text: String,
}

impl RemoteError {
    /// Wrap the error section exactly as the device sent it.
    pub fn new(text: impl Into<String>) -> Self {
        RemoteError { text: text.into() }
    }

    /// The full error section, verbatim.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The last non-empty line, normally `ExceptionType: message`.
    pub fn summary(&self) -> &str {
        self.text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("")
    }

    /// Classify the exception from its summary line.
    pub fn kind(&self) -> RemoteErrorKind {
        let line = self.summary();
        if line.starts_with("KeyboardInterrupt") {
            return RemoteErrorKind::Interrupted;
        }
        let Some(rest) = line.strip_prefix("OSError:") else {
            return RemoteErrorKind::Other;
        };

        // "[Errno 2] ENOENT" on most ports, a bare "2" on older ones.
        if let Some(kind) = rest
            .split_whitespace()
            .find_map(RemoteErrorKind::from_errno_name)
        {
            return kind;
        }
        let digits: String = rest
            .trim()
            .trim_start_matches("[Errno")
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits
            .parse()
            .map(RemoteErrorKind::from_errno)
            .unwrap_or(RemoteErrorKind::Other)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENOENT_TRACEBACK: &str = "Traceback (most recent call last):\r\n  File \"<stdin>\", line 2, in <module>\r\nOSError: [Errno 2] ENOENT\r\n";

    #[test]
    fn test_summary_is_last_line() {
        let err = RemoteError::new(ENOENT_TRACEBACK);
        assert_eq!(err.summary(), "OSError: [Errno 2] ENOENT");
        assert_eq!(err.text(), ENOENT_TRACEBACK);
    }

    #[test]
    fn test_kind_from_errno_name() {
        assert_eq!(RemoteError::new(ENOENT_TRACEBACK).kind(), RemoteErrorKind::NotFound);
        assert_eq!(
            RemoteError::new("OSError: [Errno 20] ENOTDIR").kind(),
            RemoteErrorKind::NotADirectory
        );
        assert_eq!(
            RemoteError::new("OSError: [Errno 17] EEXIST").kind(),
            RemoteErrorKind::AlreadyExists
        );
    }

    #[test]
    fn test_kind_from_bare_errno() {
        assert_eq!(RemoteError::new("OSError: 2\r\n").kind(), RemoteErrorKind::NotFound);
        assert_eq!(RemoteError::new("OSError: 39").kind(), RemoteErrorKind::NotEmpty);
    }

    #[test]
    fn test_kind_interrupted_and_other() {
        assert_eq!(
            RemoteError::new("Traceback:\r\nKeyboardInterrupt: \r\n").kind(),
            RemoteErrorKind::Interrupted
        );
        assert_eq!(
            RemoteError::new("NameError: name 'x' isn't defined").kind(),
            RemoteErrorKind::Other
        );
        assert_eq!(RemoteError::new("OSError: 5").kind(), RemoteErrorKind::Other);
    }

    #[test]
    fn test_timeout_message() {
        let err = ReplError::Timeout {
            waiting_for: "\"OK\"".to_string(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "timed out after 250ms waiting for \"OK\"");
        assert!(err.is_timeout());
    }
}
