use std::path::PathBuf;

use thiserror::Error;
use upyrepl_fs::FsError;
use upyrepl_protocol::ReplError;
use upyrepl_transport::TransportError;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no serial port given (use --port or connection.port in the config file)")]
    NoPort,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Repl(#[from] ReplError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
