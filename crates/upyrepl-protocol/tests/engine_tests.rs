//! Integration tests for the raw REPL engine against the simulated board.
//!
//! Every test runs the real enter → execute → exit cycle over a
//! [`SimDevice`], with timings shrunk so the suite stays fast.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use upyrepl_protocol::{
    CancelToken, EngineConfig, RemoteErrorKind, ReplEngine, ReplError, SessionState, StreamOutcome,
};
use upyrepl_sim::{Program, SimDevice, WireEvent};
use upyrepl_transport::TransportError;

/// Engine timings suitable for the instant-reply simulator.
fn fast_config() -> EngineConfig {
    EngineConfig {
        settle_delay_ms: 2,
        banner_timeout_ms: 200,
        command_timeout_ms: 500,
        error_timeout_ms: 50,
        startup_delay_ms: 0,
        poll_interval_ms: 1,
        stream_idle_timeout_ms: None,
    }
}

fn engine() -> (ReplEngine<SimDevice>, upyrepl_sim::DeviceProbe) {
    let device = SimDevice::new();
    let probe = device.probe();
    (ReplEngine::new(device, fast_config()), probe)
}

// ============================================================================
// Single commands
// ============================================================================

#[test]
fn test_execute_returns_trimmed_output() {
    let (engine, probe) = engine();
    let output = engine.execute("print('hello')").expect("execute should succeed");
    assert_eq!(output, "hello");
    assert_eq!(probe.enter_count(), 1);
    assert_eq!(probe.exit_count(), 1);
    assert_eq!(engine.state(), SessionState::Idle);
    assert!(!probe.in_raw_mode());
}

#[test]
fn test_multiline_output_keeps_interior_line_breaks() {
    let (engine, _probe) = engine();
    let output = engine.execute("print('a')\nprint('b')").unwrap();
    assert_eq!(output, "a\r\nb");
}

#[test]
fn test_remote_error_still_leaves_raw_mode() {
    let (engine, probe) = engine();
    let err = engine
        .execute("import os\nos.listdir('/nope')")
        .expect_err("listing a missing directory should fail");

    let remote = err.remote().expect("should be a remote execution error");
    assert_eq!(remote.kind(), RemoteErrorKind::NotFound);
    assert_eq!(remote.summary(), "OSError: [Errno 2] ENOENT");
    assert!(remote.text().starts_with("Traceback"));

    assert_eq!(probe.enter_count(), probe.exit_count());
    assert_eq!(engine.state(), SessionState::Idle);

    // The engine is immediately usable again.
    assert_eq!(engine.execute("print(1 + 1)").unwrap(), "2");
}

#[test]
fn test_session_shares_one_raw_entry() {
    let (engine, probe) = engine();
    let answer = engine
        .with_session(|session| {
            session.execute("x = 40")?;
            session.execute("print(x + 2)")
        })
        .unwrap();
    assert_eq!(answer, "42");
    assert_eq!(probe.enter_count(), 1);
    assert_eq!(probe.exit_count(), 1);
    assert_eq!(probe.commands().len(), 2);
}

#[test]
fn test_session_exits_when_closure_fails() {
    let (engine, probe) = engine();
    let result: Result<String, ReplError> = engine.with_session(|session| {
        session.execute("raise OSError('boom')")?;
        session.execute("print('unreachable')")
    });
    assert!(result.is_err());
    assert_eq!(probe.commands().len(), 1);
    assert_eq!(probe.raw_transitions(), vec![WireEvent::EnterRaw, WireEvent::ExitRaw]);
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_read_until_times_out_on_silent_device() {
    let (engine, probe) = engine();
    probe.set_unresponsive(true);

    let budget = Duration::from_millis(100);
    let started = Instant::now();
    let err = engine.read_until(b">", budget).unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(elapsed >= budget);
    // Idle polls are 1ms apart, so the deadline is noticed almost at once.
    assert!(
        elapsed < budget + Duration::from_millis(50),
        "timed out too late: {elapsed:?}"
    );
}

#[test]
fn test_timeout_leaves_engine_usable() {
    let (engine, probe) = engine();
    probe.set_unresponsive(true);
    let err = engine.execute("print('lost')").unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(engine.state(), SessionState::Idle);

    probe.set_unresponsive(false);
    assert_eq!(engine.execute("print('back')").unwrap(), "back");
}

#[test]
fn test_execute_with_timeout_bounds_the_wait() {
    let (engine, probe) = engine();
    probe.install_program("hang()", Program::Hang);

    let started = Instant::now();
    let err = engine
        .execute_with_timeout("hang()", Duration::from_millis(50))
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.state(), SessionState::Idle);

    // The next call's interrupt stops the hung program.
    assert_eq!(engine.execute("print('next')").unwrap(), "next");
    assert!(!probe.is_running());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_callers_never_interleave() {
    let device = SimDevice::new();
    let probe = device.probe();
    let engine = Arc::new(ReplEngine::new(device, fast_config()));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..3 {
                    let output = engine
                        .execute(&format!("print({} + {})", worker * 100, round))
                        .expect("execute should succeed");
                    assert_eq!(output, (worker * 100 + round).to_string());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker should not panic");
    }

    let transitions = probe.raw_transitions();
    assert_eq!(transitions.len(), 24);
    for pair in transitions.chunks(2) {
        assert_eq!(pair, [WireEvent::EnterRaw, WireEvent::ExitRaw]);
    }
}

// ============================================================================
// Reset and resynchronisation
// ============================================================================

#[test]
fn test_reset_requires_resync() {
    let (engine, probe) = engine();
    engine
        .with_session(|session| session.submit_detached("import machine\nmachine.reset()"))
        .unwrap();
    assert_eq!(probe.reset_count(), 1);
    assert_eq!(engine.state(), SessionState::Unsynced);

    let err = engine.execute("print(1)").unwrap_err();
    assert!(matches!(
        err,
        ReplError::ProtocolState {
            state: SessionState::Unsynced,
            ..
        }
    ));

    engine.resync().unwrap();
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(engine.execute("print(1)").unwrap(), "1");
}

#[test]
fn test_open_finds_friendly_prompt() {
    let device = SimDevice::new();
    let engine = ReplEngine::open(device, fast_config()).expect("open should succeed");
    assert_eq!(engine.state(), SessionState::Idle);
}

#[test]
fn test_open_fails_on_silent_device() {
    let device = SimDevice::new();
    device.probe().set_unresponsive(true);
    let err = ReplEngine::open(device, fast_config()).err().expect("open should fail");
    assert!(err.is_timeout());
}

// ============================================================================
// Close and transport failures
// ============================================================================

#[test]
fn test_close_is_idempotent_and_final() {
    let (engine, _probe) = engine();
    engine.close().unwrap();
    engine.close().unwrap();
    assert!(engine.is_closed());
    let err = engine.execute("print(1)").unwrap_err();
    assert!(matches!(err, ReplError::Transport(TransportError::Closed)));
}

#[test]
fn test_transport_failure_surfaces() {
    let (engine, probe) = engine();
    probe.disconnect();
    let err = engine.execute("print(1)").unwrap_err();
    assert!(matches!(err, ReplError::Transport(TransportError::Io(_))));
    assert_eq!(engine.state(), SessionState::Idle);
}

// ============================================================================
// Streaming
// ============================================================================

#[test]
fn test_streaming_delivers_output_and_completes() {
    let device = SimDevice::new();
    let probe = device.probe();
    probe.install_program(
        "count()",
        Program::Finite {
            chunks: vec!["1\r\n".into(), "2\r\n".into(), "3\r\n".into()],
            error: None,
        },
    );
    let engine = Arc::new(ReplEngine::new(device, fast_config()));

    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = engine
        .execute_streaming("count()", move |b| tx.send(b).unwrap(), CancelToken::new())
        .unwrap();
    assert_eq!(handle.join().unwrap(), StreamOutcome::Completed);

    let received: Vec<u8> = rx.try_iter().collect();
    assert_eq!(received, b"1\r\n2\r\n3\r\n");
    assert_eq!(probe.enter_count(), probe.exit_count());
    assert_eq!(engine.state(), SessionState::Idle);
}

#[test]
fn test_streaming_cancel_interrupts_and_exits() {
    let device = SimDevice::new();
    let probe = device.probe();
    probe.install_program("forever()", Program::Endless { line: "tick".into() });
    let engine = Arc::new(ReplEngine::new(device, fast_config()));

    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = engine
        .execute_streaming("forever()", move |b| { let _ = tx.send(b); }, CancelToken::new())
        .unwrap();

    // Wait until output is flowing, then cancel.
    let first = rx.recv_timeout(Duration::from_secs(2)).expect("output should arrive");
    assert_eq!(first, b't');
    handle.cancel();
    assert_eq!(handle.join().unwrap(), StreamOutcome::Cancelled);

    assert!(!probe.is_running());
    assert!(probe.events().contains(&WireEvent::Interrupt));
    assert_eq!(probe.enter_count(), probe.exit_count());
    assert_eq!(engine.execute("print('after')").unwrap(), "after");
}

#[test]
fn test_streaming_cancelled_before_start_submits_nothing() {
    let (engine, probe) = engine();
    let engine = Arc::new(engine);
    let token = CancelToken::new();
    token.cancel();
    let handle = engine.execute_streaming("print(1)", |_| {}, token).unwrap();
    assert_eq!(handle.join().unwrap(), StreamOutcome::Cancelled);
    assert!(probe.commands().is_empty());
    assert_eq!(probe.enter_count(), probe.exit_count());
}

#[test]
fn test_streaming_remote_error() {
    let device = SimDevice::new();
    let probe = device.probe();
    probe.install_program(
        "fail()",
        Program::Finite {
            chunks: vec!["partial".into()],
            error: Some("ValueError: boom".into()),
        },
    );
    let engine = Arc::new(ReplEngine::new(device, fast_config()));
    let handle = engine.execute_streaming("fail()", |_| {}, CancelToken::new()).unwrap();
    let err = handle.join().unwrap_err();
    assert_eq!(err.remote().map(|r| r.summary().to_string()), Some("ValueError: boom".to_string()));
    assert_eq!(probe.enter_count(), probe.exit_count());
}
