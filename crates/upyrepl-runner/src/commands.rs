//! Subcommand dispatch.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use upyrepl_fs::RemoteFilesystem;
use upyrepl_protocol::{CancelToken, StreamOutcome};
use upyrepl_transport::Transport;

use crate::cli::Command;
use crate::RunnerResult;

/// Run one connected subcommand against `fs`, writing user-facing output to `out`.
///
/// `cancel` is only consulted by `stream`.
pub fn dispatch<T: Transport + 'static>(
    fs: &RemoteFilesystem<T>,
    command: &Command,
    out: &mut dyn Write,
    cancel: &CancelToken,
) -> RunnerResult<()> {
    match command {
        Command::Ports => print_ports(out)?,
        Command::Ls { path } => {
            for entry in fs.list(path)? {
                writeln!(out, "{}", entry)?;
            }
        }
        Command::Exists { path } => writeln!(out, "{}", fs.exists(path)?)?,
        Command::Mkdir { path } => fs.create_directory(path)?,
        Command::Rmdir { path } => fs.delete_directory(path)?,
        Command::Touch { path } => fs.create_file(path)?,
        Command::Rm { path } => fs.delete_file(path)?,
        Command::Mv { from, to } => fs.rename(from, to)?,
        Command::Get {
            remote,
            local,
            chunk_size,
        } => {
            let local = local.clone().unwrap_or_else(|| default_local_path(remote));
            let chunk_size = chunk_size.unwrap_or(fs.transfer_config().chunk_size);
            let bytes = fs.download_chunked(remote, &local, chunk_size)?;
            info!("downloaded {} bytes from {} to {}", bytes, remote, local.display());
            writeln!(out, "{} bytes", bytes)?;
        }
        Command::Put {
            local,
            remote,
            chunk_size,
        } => {
            let remote = remote.clone().unwrap_or_else(|| default_remote_path(local));
            let chunk_size = chunk_size.unwrap_or(fs.transfer_config().chunk_size);
            let bytes = fs.upload_chunked(local, &remote, chunk_size)?;
            info!("uploaded {} bytes from {} to {}", bytes, local.display(), remote);
            writeln!(out, "{} bytes", bytes)?;
        }
        Command::Run { code } => print_text(out, &fs.run(code)?)?,
        Command::Stream { code } => {
            let outcome = stream(fs, code, out, cancel)?;
            if outcome == StreamOutcome::Cancelled {
                writeln!(out)?;
                writeln!(out, "interrupted")?;
            }
        }
        Command::ExecFile { path } => print_text(out, &fs.execute_file(path)?)?,
        Command::Cwd => writeln!(out, "{}", fs.working_directory()?)?,
        Command::Echo { message } => writeln!(out, "{}", fs.echo(message)?)?,
        Command::Reset => {
            fs.reset()?;
            writeln!(out, "board reset")?;
        }
    }
    Ok(())
}

/// Print the ports the OS reports, one per line.
pub fn print_ports(out: &mut dyn Write) -> RunnerResult<()> {
    let ports = upyrepl_transport::available_ports()?;
    if ports.is_empty() {
        writeln!(out, "no serial ports found")?;
    }
    for port in ports {
        writeln!(out, "{}", port)?;
    }
    Ok(())
}

/// Forward streamed bytes to `out` until the run ends.
fn stream<T: Transport + 'static>(
    fs: &RemoteFilesystem<T>,
    code: &str,
    out: &mut dyn Write,
    cancel: &CancelToken,
) -> RunnerResult<StreamOutcome> {
    let (tx, rx) = crossbeam_channel::unbounded::<u8>();
    let handle = fs.run_streaming(
        code,
        move |byte| {
            let _ = tx.send(byte);
        },
        cancel.clone(),
    )?;

    // The sender lives in the worker's callback; the channel closes when the worker ends.
    for byte in rx.iter() {
        out.write_all(&[byte])?;
        if byte == b'\n' {
            out.flush()?;
        }
    }
    out.flush()?;
    Ok(handle.join()?)
}

fn print_text(out: &mut dyn Write, text: &str) -> RunnerResult<()> {
    if !text.is_empty() {
        writeln!(out, "{}", text)?;
    }
    Ok(())
}

/// Last component of a remote path, in the current directory.
fn default_local_path(remote: &str) -> PathBuf {
    let name = remote.trim_end_matches('/').rsplit('/').next().unwrap_or(remote);
    if name.is_empty() {
        PathBuf::from("download.bin")
    } else {
        PathBuf::from(name)
    }
}

/// Local file name, placed at the remote root.
fn default_remote_path(local: &Path) -> String {
    match local.file_name() {
        Some(name) => format!("/{}", name.to_string_lossy()),
        None => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_local_takes_last_component() {
        assert_eq!(default_local_path("/lib/util.py"), PathBuf::from("util.py"));
        assert_eq!(default_local_path("boot.py"), PathBuf::from("boot.py"));
        assert_eq!(default_local_path("/"), PathBuf::from("download.bin"));
    }

    #[test]
    fn default_remote_is_rooted() {
        assert_eq!(default_remote_path(Path::new("build/main.py")), "/main.py");
    }
}
