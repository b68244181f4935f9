//! Engine timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::*;

/// Timing parameters of the raw REPL engine.
///
/// All timeouts are idle budgets: the clock restarts on every received byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause after each interrupt and after the raw banner (ms).
    pub settle_delay_ms: u64,
    /// Budget for the raw REPL banner and the friendly prompt (ms).
    pub banner_timeout_ms: u64,
    /// Default budget for a command's acknowledgement and output (ms).
    pub command_timeout_ms: u64,
    /// Budget for the error section after the first terminator (ms).
    pub error_timeout_ms: u64,
    /// Pause between opening the connection and the first handshake (ms).
    pub startup_delay_ms: u64,
    /// Sleep between polls of an idle transport (ms).
    pub poll_interval_ms: u64,
    /// Optional idle budget for streaming runs (ms). `None` waits forever.
    pub stream_idle_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Pause after each interrupt and after the raw banner.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Budget for the raw REPL banner and the friendly prompt.
    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.banner_timeout_ms)
    }

    /// Default budget for a command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Budget for the error section.
    pub fn error_timeout(&self) -> Duration {
        Duration::from_millis(self.error_timeout_ms)
    }

    /// Pause before the first handshake.
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// Sleep between polls of an idle transport.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Idle budget for streaming runs.
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            banner_timeout_ms: DEFAULT_BANNER_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            error_timeout_ms: DEFAULT_ERROR_TIMEOUT_MS,
            startup_delay_ms: DEFAULT_STARTUP_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stream_idle_timeout_ms: None,
        }
    }
}
