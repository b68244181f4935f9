use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "upyrepl")]
#[command(about = "Manage files and run code on a MicroPython board over its raw REPL")]
#[command(version)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial port (overrides the config file)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List serial ports reported by the OS
    Ports,

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Check whether a remote path exists
    Exists { path: String },

    /// Create a remote directory
    Mkdir { path: String },

    /// Delete a remote directory and everything below it
    Rmdir { path: String },

    /// Create an empty remote file (truncates an existing one)
    Touch { path: String },

    /// Delete a remote file
    Rm { path: String },

    /// Rename a remote file or directory
    Mv { from: String, to: String },

    /// Download a remote file
    Get {
        remote: String,
        /// Local destination (defaults to the remote file name)
        local: Option<PathBuf>,
        /// Bytes per round trip
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Upload a local file
    Put {
        local: PathBuf,
        /// Remote destination (defaults to /<local file name>)
        remote: Option<String>,
        /// Bytes per round trip
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Run a snippet and print its output
    Run { code: String },

    /// Run a snippet and stream its output until it ends or Ctrl-C
    Stream { code: String },

    /// Execute a script stored on the board
    ExecFile { path: String },

    /// Print the remote working directory
    Cwd,

    /// Print a message from the board
    Echo { message: String },

    /// Reset the board with machine.reset(); reconnect afterwards
    Reset,
}

impl Command {
    /// Whether the command needs an open connection.
    pub fn needs_connection(&self) -> bool {
        !matches!(self, Command::Ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["upyrepl", "ls", "/lib", "-p", "/dev/ttyACM0", "-vv"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, Command::Ls { path: "/lib".into() });
    }

    #[test]
    fn ls_defaults_to_root() {
        let cli = Cli::try_parse_from(["upyrepl", "ls"]).unwrap();
        assert_eq!(cli.command, Command::Ls { path: "/".into() });
    }

    #[test]
    fn exec_file_is_kebab_case() {
        let cli = Cli::try_parse_from(["upyrepl", "exec-file", "/main.py"]).unwrap();
        assert_eq!(cli.command, Command::ExecFile { path: "/main.py".into() });
    }

    #[test]
    fn get_accepts_chunk_size() {
        let cli = Cli::try_parse_from(["upyrepl", "get", "/a.bin", "out.bin", "--chunk-size", "512"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Get {
                remote: "/a.bin".into(),
                local: Some(PathBuf::from("out.bin")),
                chunk_size: Some(512),
            }
        );
    }

    #[test]
    fn reset_help_names_the_remote_call() {
        use clap::CommandFactory;
        let cli = Cli::command();
        let reset = cli.find_subcommand("reset").unwrap();
        let about = reset.get_about().unwrap().to_string();
        assert!(about.contains("machine.reset()"), "{}", about);
    }

    #[test]
    fn ports_needs_no_connection() {
        assert!(!Command::Ports.needs_connection());
        assert!(Command::Cwd.needs_connection());
    }
}
