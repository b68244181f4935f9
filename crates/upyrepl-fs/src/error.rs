//! Error types for remote filesystem operations.

use std::path::PathBuf;

use thiserror::Error;
use upyrepl_protocol::{RemoteError, ReplError};

/// Errors returned by [`crate::RemoteFilesystem`].
#[derive(Debug, Error)]
pub enum FsError {
    /// The protocol engine failed (transport, timeout, remote exception, state).
    #[error(transparent)]
    Repl(#[from] ReplError),

    /// Reading or writing the local side of a transfer failed.
    #[error("local I/O error on {}: {source}", path.display())]
    Io {
        /// Local file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The remote path cannot be expressed as a literal.
    #[error("invalid remote path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Transfers need a chunk size of at least one byte.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// A download chunk was not a printed bytes literal.
    #[error("malformed transfer chunk: {0:?}")]
    MalformedChunk(String),

    /// A directory listing was not a printed list of strings.
    #[error("malformed directory listing: {0:?}")]
    MalformedListing(String),

    /// A download chunk was not valid base64.
    #[error("invalid base64 in transfer chunk: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The remote path does not exist.
    #[error("remote path not found: {0}")]
    NotFound(String),
}

impl FsError {
    /// The device-reported error, if this is a remote exception.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            FsError::Repl(e) => e.remote(),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> FsError {
        let path = path.into();
        move |source| FsError::Io { path, source }
    }
}

/// Result type alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;
