//! Command-line front end for upyrepl.
//!
//! Wires configuration, logging and the remote filesystem together. The
//! `upyrepl` binary is a thin wrapper around [`run`].

pub mod cli;
pub mod commands;
pub mod config;
mod error;
pub mod logging;

pub use error::*;

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info};
use upyrepl_fs::RemoteFilesystem;
use upyrepl_protocol::{CancelToken, ReplEngine};
use upyrepl_transport::SerialTransport;

use crate::cli::{Cli, Command};
use crate::config::Config;

/// Execute a parsed command line.
pub fn run(cli: &Cli, out: &mut dyn Write) -> RunnerResult<()> {
    let config = Config::load_or_default(cli.config.as_deref())?.with_overrides(cli.port.as_deref(), cli.baud);
    debug!("effective config: {:?}", config);

    if !cli.command.needs_connection() {
        return commands::print_ports(out);
    }

    config.require_port()?;
    upyrepl_metrics::describe_metrics();

    let transport = SerialTransport::open(config.connection.clone())?;
    let engine = Arc::new(ReplEngine::open(transport, config.engine.clone())?);
    info!("connected to {} at {} baud", config.connection.port, config.connection.baud_rate);
    let fs = RemoteFilesystem::with_transfer_config(engine, config.transfer.clone());

    let cancel = CancelToken::new();
    if matches!(cli.command, Command::Stream { .. }) {
        let token = cancel.clone();
        ctrlc::set_handler(move || token.cancel())?;
    }

    let result = commands::dispatch(&fs, &cli.command, out, &cancel);
    let closed = fs.close();
    result?;
    closed?;
    Ok(())
}
