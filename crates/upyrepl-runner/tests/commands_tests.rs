//! Subcommand dispatch against the simulated board.

use std::fs;
use std::sync::Arc;

use upyrepl_fs::{FsError, RemoteFilesystem};
use upyrepl_protocol::{CancelToken, EngineConfig, ReplEngine};
use upyrepl_runner::cli::Command;
use upyrepl_runner::commands::dispatch;
use upyrepl_runner::RunnerError;
use upyrepl_sim::{DeviceProbe, Program, SimDevice};

fn fast_config() -> EngineConfig {
    EngineConfig {
        settle_delay_ms: 1,
        banner_timeout_ms: 200,
        command_timeout_ms: 500,
        error_timeout_ms: 50,
        startup_delay_ms: 0,
        poll_interval_ms: 1,
        stream_idle_timeout_ms: None,
    }
}

fn board() -> (RemoteFilesystem<SimDevice>, DeviceProbe) {
    let device = SimDevice::new();
    let probe = device.probe();
    let engine = Arc::new(ReplEngine::new(device, fast_config()));
    (RemoteFilesystem::new(engine), probe)
}

fn run(fs: &RemoteFilesystem<SimDevice>, command: Command) -> Result<String, RunnerError> {
    let mut out = Vec::new();
    dispatch(fs, &command, &mut out, &CancelToken::new())?;
    Ok(String::from_utf8(out).unwrap())
}

#[test]
fn test_ls_prints_entries() {
    let (fs, probe) = board();
    probe.write_file("/main.py", b"");
    probe.mkdir("/lib");
    let out = run(&fs, Command::Ls { path: "/".into() }).unwrap();
    assert_eq!(out, "main.py\nlib/\n");
}

#[test]
fn test_exists_prints_bool() {
    let (fs, probe) = board();
    probe.write_file("/a.txt", b"x");
    assert_eq!(run(&fs, Command::Exists { path: "/a.txt".into() }).unwrap(), "true\n");
    assert_eq!(run(&fs, Command::Exists { path: "/b.txt".into() }).unwrap(), "false\n");
}

#[test]
fn test_file_management_commands() {
    let (fs, probe) = board();
    run(&fs, Command::Mkdir { path: "/data".into() }).unwrap();
    run(&fs, Command::Touch { path: "/data/log.txt".into() }).unwrap();
    run(
        &fs,
        Command::Mv {
            from: "/data/log.txt".into(),
            to: "/data/old.txt".into(),
        },
    )
    .unwrap();
    assert!(probe.exists("/data/old.txt"));
    assert!(!probe.exists("/data/log.txt"));

    run(&fs, Command::Rm { path: "/data/old.txt".into() }).unwrap();
    assert!(!probe.exists("/data/old.txt"));
    run(&fs, Command::Rmdir { path: "/data".into() }).unwrap();
    assert!(!probe.exists("/data"));
    assert_eq!(probe.enter_count(), probe.exit_count());
}

#[test]
fn test_put_then_get() {
    let (fs, probe) = board();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("payload.bin");
    let payload: Vec<u8> = (0u8..=255).collect();
    fs::write(&local, &payload).unwrap();

    let out = run(
        &fs,
        Command::Put {
            local: local.clone(),
            remote: None,
            chunk_size: Some(100),
        },
    )
    .unwrap();
    assert_eq!(out, "256 bytes\n");
    assert_eq!(probe.read_file("/payload.bin").unwrap(), payload);

    let back = dir.path().join("back.bin");
    run(
        &fs,
        Command::Get {
            remote: "/payload.bin".into(),
            local: Some(back.clone()),
            chunk_size: None,
        },
    )
    .unwrap();
    assert_eq!(fs::read(&back).unwrap(), payload);
}

#[test]
fn test_zero_chunk_size_is_rejected() {
    let (fs, _probe) = board();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("a.txt");
    fs::write(&local, b"abc").unwrap();
    let err = run(
        &fs,
        Command::Put {
            local,
            remote: Some("/a.txt".into()),
            chunk_size: Some(0),
        },
    )
    .unwrap_err();
    assert!(matches!(err, RunnerError::Fs(FsError::InvalidChunkSize)));
}

#[test]
fn test_run_echo_and_cwd() {
    let (fs, probe) = board();
    assert_eq!(run(&fs, Command::Run { code: "print(1 + 2)".into() }).unwrap(), "3\n");
    assert_eq!(run(&fs, Command::Echo { message: "hi".into() }).unwrap(), "hi\n");
    assert_eq!(run(&fs, Command::Cwd).unwrap(), "/\n");

    probe.write_file("/script.py", b"print('from file')");
    assert_eq!(run(&fs, Command::ExecFile { path: "/script.py".into() }).unwrap(), "from file\n");
}

#[test]
fn test_run_reports_remote_error() {
    let (fs, probe) = board();
    let err = run(&fs, Command::Rm { path: "/missing".into() }).unwrap_err();
    assert!(err.to_string().contains("ENOENT"), "{}", err);
    assert!(!probe.in_raw_mode());
}

#[test]
fn test_stream_forwards_output() {
    let (fs, probe) = board();
    probe.install_program(
        "count()",
        Program::Finite {
            chunks: vec!["1\r\n".into(), "2\r\n".into()],
            error: None,
        },
    );
    let out = run(&fs, Command::Stream { code: "count()".into() }).unwrap();
    assert_eq!(out, "1\r\n2\r\n");
}

#[test]
fn test_stream_cancelled_reports_interruption() {
    let (fs, probe) = board();
    probe.install_program("blink()", Program::Endless { line: "on".into() });
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(30));
        trigger.cancel();
    });

    let mut out = Vec::new();
    dispatch(&fs, &Command::Stream { code: "blink()".into() }, &mut out, &cancel).unwrap();
    timer.join().unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("on"));
    assert!(text.ends_with("interrupted\n"));
    assert!(!probe.in_raw_mode());
    assert_eq!(run(&fs, Command::Echo { message: "still here".into() }).unwrap(), "still here\n");
}

#[test]
fn test_reset_command() {
    let (fs, probe) = board();
    assert_eq!(run(&fs, Command::Reset).unwrap(), "board reset\n");
    assert_eq!(probe.reset_count(), 1);
}
