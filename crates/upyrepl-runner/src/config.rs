//! YAML configuration file.
//!
//! ```yaml
//! connection:
//!   port: /dev/ttyACM0
//!   baud_rate: 115200
//! engine:
//!   command_timeout_ms: 20000
//! transfer:
//!   chunk_size: 256
//! ```
//!
//! Every field is optional. Command-line flags win over file values.

use std::path::Path;

use serde::{Deserialize, Serialize};
use upyrepl_fs::TransferConfig;
use upyrepl_protocol::EngineConfig;
use upyrepl_transport::ConnectionConfig;

use crate::{RunnerError, RunnerResult};

/// Complete runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub engine: EngineConfig,
    pub transfer: TransferConfig,
}

impl Config {
    /// Parse YAML text. An empty document yields the defaults.
    pub fn from_yaml(text: &str, origin: &Path) -> RunnerResult<Self> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(text).map_err(|source| RunnerError::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> RunnerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RunnerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Load `path` if given, otherwise start from the defaults.
    pub fn load_or_default(path: Option<&Path>) -> RunnerResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Config::default()),
        }
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, port: Option<&str>, baud_rate: Option<u32>) -> Self {
        if let Some(port) = port {
            self.connection.port = port.to_string();
        }
        if let Some(baud_rate) = baud_rate {
            self.connection.baud_rate = baud_rate;
        }
        self
    }

    /// Fail unless a port has been chosen.
    pub fn require_port(&self) -> RunnerResult<&str> {
        if self.connection.port.is_empty() {
            Err(RunnerError::NoPort)
        } else {
            Ok(&self.connection.port)
        }
    }
}
