//! Remote Filesystem for MicroPython Boards
//!
//! MicroPython exposes no file protocol over its serial REPL, only a way to run
//! code. This crate builds a filesystem API out of that: each operation
//! generates a few lines of Python, runs them through the raw REPL engine
//! ([`upyrepl_protocol::ReplEngine`]) and parses what the device prints.
//!
//! # Transfers
//!
//! Downloads print each chunk as a base64 bytes literal
//! (`ubinascii.b2a_base64(f.read(n)).strip()`); uploads embed each block as a
//! fully hex-escaped bytes literal. Both wrap the remote call in a
//! `try`/`except` that closes the file handle before re-raising, because after a
//! failure the host cannot count on another round trip.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use upyrepl_fs::RemoteFilesystem;
//!
//! let engine = Arc::new(ReplEngine::open(transport, EngineConfig::default())?);
//! let fs = RemoteFilesystem::new(engine);
//! for entry in fs.list("/")? {
//!     println!("{}", entry);
//! }
//! fs.upload(Path::new("main.py"), "/main.py")?;
//! ```

mod config;
mod entry;
mod error;
mod filesystem;
mod listing;
pub mod path;
mod snippets;

pub use config::*;
pub use entry::*;
pub use error::*;
pub use filesystem::*;
