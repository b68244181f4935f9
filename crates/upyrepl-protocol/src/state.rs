//! Session state of the raw REPL engine.

use std::fmt;

/// Where the engine is in the enter → execute → exit cycle.
///
/// Every call starts and ends in [`SessionState::Idle`]. [`SessionState::Unsynced`]
/// is entered after a soft reset has been submitted and is only left by
/// resynchronising with the friendly prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Friendly REPL, no call in progress.
    Idle,
    /// Sending the interrupt sequence.
    Interrupting,
    /// Waiting for the raw REPL banner.
    EnteringRaw,
    /// In raw mode, ready to accept a command.
    RawReady,
    /// Command submitted, waiting for the acknowledgement.
    Executing,
    /// Acknowledged, reading the output and error sections.
    AwaitingResult,
    /// Leaving raw mode.
    ExitingRaw,
    /// The device was reset; the REPL must be resynchronised first.
    Unsynced,
}

impl SessionState {
    /// Lowercase name used in messages.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Interrupting => "interrupting",
            SessionState::EnteringRaw => "entering raw mode",
            SessionState::RawReady => "raw ready",
            SessionState::Executing => "executing",
            SessionState::AwaitingResult => "awaiting result",
            SessionState::ExitingRaw => "exiting raw mode",
            SessionState::Unsynced => "unsynced",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
