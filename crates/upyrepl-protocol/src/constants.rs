//! Protocol constants
//!
//! Control bytes and tokens of the MicroPython raw REPL. All values are
//! bit-exact; the device matches them literally.

// ============================================================================
// Control Bytes
// ============================================================================

/// Ctrl-A: switch the REPL into raw mode.
pub const CTRL_A: u8 = 0x01;
/// Ctrl-B: leave raw mode for the friendly REPL.
pub const CTRL_B: u8 = 0x02;
/// Ctrl-C: raise `KeyboardInterrupt` in whatever is running.
pub const CTRL_C: u8 = 0x03;
/// Ctrl-D / end of transmission. Terminates a submitted command and each
/// output section the device sends back.
pub const EOT: u8 = 0x04;

// ============================================================================
// Host → Device Sequences
// ============================================================================

/// Interrupt sequence. Sent twice, each followed by the settle delay.
pub const INTERRUPT: &[u8] = b"\r\x03";
/// Enter raw mode.
pub const ENTER_RAW: &[u8] = b"\r\x01";
/// Exit raw mode. The device's reply is not awaited.
pub const EXIT_RAW: &[u8] = b"\r\x02";
/// Wakes the friendly REPL so it prints a fresh prompt.
pub const WAKE: &[u8] = b"\r\n";

// ============================================================================
// Device → Host Tokens
// ============================================================================

/// Banner printed once raw mode is active.
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
/// Acknowledgement sent after a submitted command has been accepted.
pub const ACK: &[u8] = b"OK";
/// Friendly REPL prompt.
pub const FRIENDLY_PROMPT: &[u8] = b">>>";

// ============================================================================
// Timing Defaults (milliseconds)
// ============================================================================

/// Pause after each interrupt and after entering raw mode.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;
/// How long to wait for the raw REPL banner.
pub const DEFAULT_BANNER_TIMEOUT_MS: u64 = 5_000;
/// Idle budget for the acknowledgement and primary output of a command.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;
/// Idle budget for the error section that follows the first terminator.
pub const DEFAULT_ERROR_TIMEOUT_MS: u64 = 100;
/// Pause between opening the port and the first handshake.
pub const DEFAULT_STARTUP_DELAY_MS: u64 = 1_000;
/// Sleep between polls of an idle transport.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;
