//! Configuration file parsing and flag precedence.

use std::fs;
use std::path::Path;

use upyrepl_runner::config::Config;
use upyrepl_runner::RunnerError;

#[test]
fn test_empty_file_gives_defaults() {
    let config = Config::from_yaml("", Path::new("empty.yaml")).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.connection.baud_rate, 115200);
    assert_eq!(config.transfer.chunk_size, 128);
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let yaml = "
connection:
  port: /dev/ttyACM0
engine:
  command_timeout_ms: 20000
transfer:
  chunk_size: 256
";
    let config = Config::from_yaml(yaml, Path::new("board.yaml")).unwrap();
    assert_eq!(config.connection.port, "/dev/ttyACM0");
    assert_eq!(config.connection.baud_rate, 115200);
    assert_eq!(config.engine.command_timeout_ms, 20000);
    assert_eq!(config.engine.settle_delay_ms, Config::default().engine.settle_delay_ms);
    assert_eq!(config.transfer.chunk_size, 256);
}

#[test]
fn test_flags_override_file() {
    let yaml = "connection:\n  port: /dev/ttyACM0\n  baud_rate: 9600\n";
    let config = Config::from_yaml(yaml, Path::new("board.yaml"))
        .unwrap()
        .with_overrides(Some("/dev/ttyUSB1"), None);
    assert_eq!(config.connection.port, "/dev/ttyUSB1");
    assert_eq!(config.connection.baud_rate, 9600);

    let config = config.with_overrides(None, Some(230400));
    assert_eq!(config.connection.port, "/dev/ttyUSB1");
    assert_eq!(config.connection.baud_rate, 230400);
}

#[test]
fn test_missing_port_is_reported() {
    let config = Config::default();
    assert!(matches!(config.require_port(), Err(RunnerError::NoPort)));
    let config = config.with_overrides(Some("COM3"), None);
    assert_eq!(config.require_port().unwrap(), "COM3");
}

#[test]
fn test_load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upyrepl.yaml");
    fs::write(&path, "transfer:\n  chunk_size: 64\n").unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.transfer.chunk_size, 64);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(err, RunnerError::ConfigRead { .. }));
}

#[test]
fn test_malformed_yaml_fails() {
    let err = Config::from_yaml("engine: [1, 2", Path::new("bad.yaml")).unwrap_err();
    assert!(matches!(err, RunnerError::ConfigParse { .. }));
    assert!(err.to_string().contains("bad.yaml"));
}

#[test]
fn test_load_or_default_without_path() {
    assert_eq!(Config::load_or_default(None).unwrap(), Config::default());
}
