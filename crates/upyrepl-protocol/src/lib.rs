//! MicroPython Raw REPL Protocol
//!
//! This crate drives the "raw REPL" of a MicroPython board over any
//! [`upyrepl_transport::Transport`]. The raw REPL runs submitted source
//! non-interactively and delimits its replies with control bytes, which makes it
//! suitable for machine use, unlike the friendly `>>>` prompt.
//!
//! # Protocol Overview
//!
//! ```text
//! host                                   device
//!  | "\r\x03" (x2, 100ms apart)            |   interrupt anything running
//!  | "\r\x01"                              |   enter raw mode
//!  |          "raw REPL; CTRL-B to exit\r\n>" |
//!  | <source> "\x04"                       |   submit
//!  |          "OK" <stdout> "\x04" <stderr> "\x04" ">"
//!  | "\r\x02"                              |   back to the friendly REPL
//! ```
//!
//! A non-blank error section means the command raised; it is surfaced as
//! [`ReplError::RemoteExecution`] with the device's text verbatim.
//!
//! # Example
//!
//! ```rust,ignore
//! use upyrepl_protocol::{EngineConfig, ReplEngine};
//!
//! let engine = ReplEngine::open(transport, EngineConfig::default())?;
//! let output = engine.execute("print(1 + 1)")?;
//! assert_eq!(output, "2");
//!
//! // Several commands in one raw session
//! engine.with_session(|session| {
//!     session.execute("x = 40")?;
//!     session.execute("print(x + 2)")
//! })?;
//! ```

mod codec;
mod config;
mod constants;
mod engine;
mod error;
mod state;
mod stream;

pub use codec::*;
pub use config::*;
pub use constants::*;
pub use engine::*;
pub use error::*;
pub use state::*;
pub use stream::*;
