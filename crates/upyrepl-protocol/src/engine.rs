//! The raw REPL state machine.
//!
//! [`ReplEngine`] owns the transport behind a single mutex. Raw mode is only
//! ever held through a [`RawSession`], a guard that keeps the mutex locked for
//! the whole enter → execute → exit cycle and writes the exit sequence when it
//! is dropped, whatever path the caller leaves by. Concurrent callers therefore
//! queue on the lock and never interleave on the wire.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use upyrepl_metrics::{metric_defs, port_labels};
use upyrepl_transport::{Transport, TransportError};

use crate::codec::DelimiterScanner;
use crate::constants::*;
use crate::stream::{CancelToken, StreamHandle, StreamOutcome};
use crate::{EngineConfig, RemoteError, ReplError, ReplResult, SessionState};

/// Mutable engine state, only reachable through the lock.
struct EngineCore<T> {
    transport: T,
    state: SessionState,
    closed: bool,
}

impl<T: Transport> EngineCore<T> {
    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            trace!("ReplEngine[{}]: {} -> {}", self.transport.name(), self.state, next);
            self.state = next;
        }
    }

    fn write(&mut self, bytes: &[u8]) -> ReplResult<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        self.transport.write(bytes)?;
        Ok(())
    }

    /// Send the interrupt sequence twice, settling after each.
    fn interrupt(&mut self, settle: Duration) -> ReplResult<()> {
        for _ in 0..2 {
            self.write(INTERRUPT)?;
            thread::sleep(settle);
        }
        Ok(())
    }
}

/// Raw REPL protocol engine for one connection.
pub struct ReplEngine<T: Transport> {
    core: Mutex<EngineCore<T>>,
    config: EngineConfig,
    name: String,
    labels: Vec<(&'static str, String)>,
}

impl<T: Transport> ReplEngine<T> {
    /// Wrap an open transport. No bytes are exchanged.
    pub fn new(transport: T, config: EngineConfig) -> Self {
        let name = transport.name().to_string();
        ReplEngine {
            labels: port_labels(&name),
            core: Mutex::new(EngineCore {
                transport,
                state: SessionState::Idle,
                closed: false,
            }),
            config,
            name,
        }
    }

    /// Wrap an open transport and wait until the board shows its friendly prompt.
    pub fn open(transport: T, config: EngineConfig) -> ReplResult<Self> {
        let engine = Self::new(transport, config);
        thread::sleep(engine.config.startup_delay());
        engine.resync()?;
        Ok(engine)
    }

    /// The engine's timing configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the underlying port.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current session state. Blocks while another caller holds the engine.
    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Whether [`ReplEngine::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.core.lock().closed
    }

    /// Interrupt the board, enter raw mode and return the guard holding it.
    ///
    /// The lock is held until the returned session is dropped. If entering fails
    /// the exit sequence is still sent before the error is returned.
    pub fn enter_raw_repl(&self) -> ReplResult<RawSession<'_, T>> {
        let core = self.core.lock();
        if core.closed {
            return Err(TransportError::Closed.into());
        }
        if core.state != SessionState::Idle {
            return Err(ReplError::ProtocolState {
                operation: "enter raw REPL",
                state: core.state,
            });
        }

        let mut session = RawSession {
            engine: self,
            core,
            released: false,
        };
        session.enter()?;
        Ok(session)
    }

    /// Run `f` inside one raw session, so several commands share one entry/exit.
    pub fn with_session<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<ReplError>,
        F: FnOnce(&mut RawSession<'_, T>) -> Result<R, E>,
    {
        let mut session = self.enter_raw_repl()?;
        f(&mut session)
    }

    /// Enter raw mode, run `command` with the default timeout, exit raw mode.
    pub fn execute(&self, command: &str) -> ReplResult<String> {
        self.execute_with_timeout(command, self.config.command_timeout())
    }

    /// Enter raw mode, run `command` with the given idle budget, exit raw mode.
    pub fn execute_with_timeout(&self, command: &str, timeout: Duration) -> ReplResult<String> {
        let mut session = self.enter_raw_repl()?;
        session.execute_once(command, timeout)
    }

    /// Read from the transport until `token` is seen, outside any session.
    pub fn read_until(&self, token: &[u8], timeout: Duration) -> ReplResult<Vec<u8>> {
        let mut core = self.core.lock();
        if core.closed {
            return Err(TransportError::Closed.into());
        }
        self.read_locked(&mut core, token, timeout)
    }

    /// Bring the board back to its friendly prompt.
    ///
    /// Required after a soft reset; also used by [`ReplEngine::open`].
    pub fn resync(&self) -> ReplResult<()> {
        let mut core = self.core.lock();
        if core.closed {
            return Err(TransportError::Closed.into());
        }
        let previous = core.state;

        match self.resync_locked(&mut core) {
            Ok(()) => {
                core.set_state(SessionState::Idle);
                debug!("ReplEngine[{}]: friendly prompt found", self.name);
                Ok(())
            }
            Err(e) => {
                core.set_state(previous);
                Err(e)
            }
        }
    }

    fn resync_locked(&self, core: &mut EngineCore<T>) -> ReplResult<()> {
        core.set_state(SessionState::Interrupting);
        core.interrupt(self.config.settle_delay())?;
        core.transport.discard_input()?;
        core.write(WAKE)?;
        self.read_locked(core, FRIENDLY_PROMPT, self.config.banner_timeout())?;
        Ok(())
    }

    /// Close the transport. Later calls fail with a closed-transport error.
    /// Calling this more than once is not an error.
    pub fn close(&self) -> ReplResult<()> {
        let mut core = self.core.lock();
        if core.closed {
            return Ok(());
        }
        core.closed = true;
        core.transport.close()?;
        debug!("ReplEngine[{}]: closed", self.name);
        Ok(())
    }

    /// The core read loop: poll the transport until `token` (or a truncating
    /// EOT) arrives, failing once `timeout` passes without a single byte.
    fn read_locked(
        &self,
        core: &mut EngineCore<T>,
        token: &[u8],
        timeout: Duration,
    ) -> ReplResult<Vec<u8>> {
        let mut scanner = DelimiterScanner::new(token);
        let mut idle_since = Instant::now();
        loop {
            match core.transport.try_read_byte()? {
                Some(byte) => {
                    idle_since = Instant::now();
                    if let Some(delimited) = scanner.push(byte) {
                        if delimited.truncated {
                            debug!(
                                "ReplEngine[{}]: EOT ended wait for {:?} early",
                                self.name,
                                String::from_utf8_lossy(token)
                            );
                        }
                        return Ok(delimited.body);
                    }
                }
                None => {
                    if idle_since.elapsed() >= timeout {
                        metrics::counter!(metric_defs::REPL_TIMEOUTS.name, &self.labels).increment(1);
                        debug!(
                            "ReplEngine[{}]: timeout waiting for {:?} ({} bytes buffered)",
                            self.name,
                            String::from_utf8_lossy(token),
                            scanner.buffered().len()
                        );
                        return Err(ReplError::Timeout {
                            waiting_for: format!("{:?}", String::from_utf8_lossy(token)),
                            after: timeout,
                        });
                    }
                    thread::sleep(self.config.poll_interval());
                }
            }
        }
    }
}

impl<T: Transport + 'static> ReplEngine<T> {
    /// Run `command` on a background thread, delivering output byte by byte.
    ///
    /// The worker queues on the engine lock like any other caller. Cancelling
    /// `cancel` (or the returned handle) sends the interrupt sequence; raw mode
    /// is left in every case before the handle reports its outcome.
    pub fn execute_streaming<F>(
        self: &Arc<Self>,
        command: impl Into<String>,
        on_output: F,
        cancel: CancelToken,
    ) -> ReplResult<StreamHandle>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let engine = Arc::clone(self);
        let command = command.into();
        let token = cancel.clone();
        let worker = thread::Builder::new()
            .name(format!("upyrepl-stream-{}", self.name))
            .spawn(move || {
                let mut on_output = on_output;
                let mut session = engine.enter_raw_repl()?;
                session.execute_streaming(&command, &mut on_output, &token)
            })
            .map_err(ReplError::Spawn)?;
        Ok(StreamHandle::new(cancel, worker))
    }
}

/// Raw mode held for the lifetime of this guard.
///
/// Dropping the session (or calling [`RawSession::exit_raw_repl`]) writes the
/// exit sequence and returns the engine to idle.
pub struct RawSession<'a, T: Transport> {
    engine: &'a ReplEngine<T>,
    core: MutexGuard<'a, EngineCore<T>>,
    released: bool,
}

impl<'a, T: Transport> RawSession<'a, T> {
    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.core.state
    }

    fn enter(&mut self) -> ReplResult<()> {
        let engine = self.engine;
        let config = &engine.config;
        self.core.set_state(SessionState::Interrupting);
        self.core.interrupt(config.settle_delay())?;
        self.core.transport.discard_input()?;

        self.core.set_state(SessionState::EnteringRaw);
        self.core.write(ENTER_RAW)?;
        engine.read_locked(&mut self.core, RAW_BANNER, config.banner_timeout())?;
        thread::sleep(config.settle_delay());

        self.core.set_state(SessionState::RawReady);
        trace!("ReplEngine[{}]: raw mode entered", engine.name);
        Ok(())
    }

    fn require_ready(&self, operation: &'static str) -> ReplResult<()> {
        if self.core.state == SessionState::RawReady {
            Ok(())
        } else {
            Err(ReplError::ProtocolState {
                operation,
                state: self.core.state,
            })
        }
    }

    fn submit(&mut self, command: &str, timeout: Duration) -> ReplResult<()> {
        trace!("ReplEngine[{}]: submit {:?}", self.engine.name, command);
        metrics::counter!(metric_defs::REPL_ROUND_TRIPS.name, &self.engine.labels).increment(1);
        self.core.set_state(SessionState::Executing);
        self.core.write(&DelimiterScanner::encode_command(command))?;
        self.engine.read_locked(&mut self.core, ACK, timeout)?;
        self.core.set_state(SessionState::AwaitingResult);
        Ok(())
    }

    /// Read until `token` within this session.
    pub fn read_until(&mut self, token: &[u8], timeout: Duration) -> ReplResult<Vec<u8>> {
        self.engine.read_locked(&mut self.core, token, timeout)
    }

    /// Submit `command` and collect its result.
    ///
    /// Returns the primary output with trailing whitespace trimmed, or
    /// [`ReplError::RemoteExecution`] carrying the error section verbatim. After a
    /// remote error the session is ready for the next command; after a timeout
    /// it is not.
    pub fn execute_once(&mut self, command: &str, timeout: Duration) -> ReplResult<String> {
        self.require_ready("execute")?;
        let started = Instant::now();
        self.submit(command, timeout)?;

        let output = self.engine.read_locked(&mut self.core, &[EOT], timeout)?;
        let error = self
            .engine
            .read_locked(&mut self.core, &[EOT], self.engine.config.error_timeout())?;
        self.core.set_state(SessionState::RawReady);

        metrics::histogram!(metric_defs::REPL_ROUND_TRIP_TIME.name, &self.engine.labels)
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let error = String::from_utf8_lossy(&error);
        if !error.trim().is_empty() {
            metrics::counter!(metric_defs::REPL_REMOTE_ERRORS.name, &self.engine.labels).increment(1);
            let remote = RemoteError::new(error.into_owned());
            debug!("ReplEngine[{}]: remote error: {}", self.engine.name, remote);
            return Err(ReplError::RemoteExecution(remote));
        }

        Ok(String::from_utf8_lossy(&output).trim_end().to_string())
    }

    /// [`RawSession::execute_once`] with the engine's default command timeout.
    pub fn execute(&mut self, command: &str) -> ReplResult<String> {
        let timeout = self.engine.config.command_timeout();
        self.execute_once(command, timeout)
    }

    /// Submit a command whose output will never arrive (a reset) and wait only
    /// for the acknowledgement. The engine is left unsynced.
    pub fn submit_detached(&mut self, command: &str) -> ReplResult<()> {
        self.require_ready("submit")?;
        let timeout = self.engine.config.command_timeout();
        self.submit(command, timeout)?;
        self.core.set_state(SessionState::Unsynced);
        debug!("ReplEngine[{}]: detached command submitted, engine unsynced", self.engine.name);
        Ok(())
    }

    /// Submit `command` and feed its output to `on_output` as it arrives.
    ///
    /// Cancellation is checked before every read. The first time it is seen
    /// the interrupt sequence is sent; the run then ends when the device
    /// closes both sections, or with a timeout if it does not within the
    /// command timeout.
    pub fn execute_streaming(
        &mut self,
        command: &str,
        on_output: &mut dyn FnMut(u8),
        cancel: &CancelToken,
    ) -> ReplResult<StreamOutcome> {
        self.require_ready("stream")?;
        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }

        let config = self.engine.config.clone();
        self.submit(command, config.command_timeout())?;

        let mut interrupted_at: Option<Instant> = None;
        let mut idle_since = Instant::now();
        loop {
            if interrupted_at.is_none() && cancel.is_cancelled() {
                debug!("ReplEngine[{}]: cancelling streaming run", self.engine.name);
                metrics::counter!(metric_defs::REPL_INTERRUPTS.name, &self.engine.labels).increment(1);
                self.core.interrupt(config.settle_delay())?;
                interrupted_at = Some(Instant::now());
                idle_since = Instant::now();
            }

            match self.core.transport.try_read_byte()? {
                Some(EOT) => break,
                Some(byte) => {
                    idle_since = Instant::now();
                    on_output(byte);
                }
                None => {
                    let budget = match interrupted_at {
                        Some(_) => Some(config.command_timeout()),
                        None => config.stream_idle_timeout(),
                    };
                    if let Some(budget) = budget {
                        if idle_since.elapsed() >= budget {
                            metrics::counter!(metric_defs::REPL_TIMEOUTS.name, &self.engine.labels)
                                .increment(1);
                            return Err(ReplError::Timeout {
                                waiting_for: "end of streaming output".to_string(),
                                after: budget,
                            });
                        }
                    }
                    thread::sleep(config.poll_interval());
                }
            }
        }

        let error = self
            .engine
            .read_locked(&mut self.core, &[EOT], config.error_timeout())?;
        self.core.set_state(SessionState::RawReady);
        let error = String::from_utf8_lossy(&error);

        if interrupted_at.is_some() {
            debug!(
                "ReplEngine[{}]: streaming run cancelled: {}",
                self.engine.name,
                RemoteError::new(error.to_string())
            );
            return Ok(StreamOutcome::Cancelled);
        }
        if !error.trim().is_empty() {
            metrics::counter!(metric_defs::REPL_REMOTE_ERRORS.name, &self.engine.labels).increment(1);
            return Err(ReplError::RemoteExecution(RemoteError::new(error.into_owned())));
        }
        Ok(StreamOutcome::Completed)
    }

    /// Leave raw mode now instead of at drop.
    pub fn exit_raw_repl(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let unsynced = self.core.state == SessionState::Unsynced;
        if !unsynced {
            self.core.set_state(SessionState::ExitingRaw);
        }
        if let Err(e) = self.core.write(EXIT_RAW) {
            warn!("ReplEngine[{}]: failed to leave raw mode: {}", self.engine.name, e);
        }
        if !unsynced {
            self.core.set_state(SessionState::Idle);
        }
        trace!("ReplEngine[{}]: raw mode released", self.engine.name);
    }
}

impl<T: Transport> Drop for RawSession<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}
