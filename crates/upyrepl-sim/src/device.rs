//! The simulated board: REPL mode machine behind a [`Transport`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;
use upyrepl_transport::{Transport, TransportError, TransportResult};

use crate::interp::{Call, Flow, Interpreter, PyErr};
use crate::vfs::Vfs;

const CTRL_A: u8 = 0x01;
const CTRL_B: u8 = 0x02;
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;

const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
const FRIENDLY_BANNER: &[u8] = b"\r\nMicroPython v1.22.0 on upyrepl-sim; simulated board\r\nType \"help()\" for more information.\r\n>>> ";
const PROMPT: &[u8] = b"\r\n>>> ";

/// A long-running program the board executes instead of interpreting its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// Prints `line` over and over until interrupted.
    Endless {
        /// Text printed per iteration, without line ending.
        line: String,
    },
    /// Prints one chunk per host poll, then finishes.
    Finite {
        /// Output chunks in order.
        chunks: Vec<String>,
        /// Exception text to raise after the last chunk, if any.
        error: Option<String>,
    },
    /// Acknowledges, then stays silent until interrupted.
    Hang,
}

/// Protocol-level happenings, in the order the board saw them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Ctrl-A received.
    EnterRaw,
    /// Ctrl-B received.
    ExitRaw,
    /// Ctrl-C received.
    Interrupt,
    /// A command was submitted in raw mode.
    Command(String),
    /// The board reset itself.
    Reset,
}

#[derive(Debug)]
enum Mode {
    Friendly,
    Raw,
    Running { program: Program, emitted: usize },
}

#[derive(Debug)]
struct Board {
    mode: Mode,
    command: Vec<u8>,
    outgoing: VecDeque<u8>,
    vfs: Vfs,
    interpreter: Interpreter,
    programs: HashMap<String, Program>,
    events: Vec<WireEvent>,
    unresponsive: bool,
    disconnected: bool,
    resets: usize,
}

impl Board {
    fn new() -> Self {
        Board {
            mode: Mode::Friendly,
            command: Vec::new(),
            outgoing: VecDeque::new(),
            vfs: Vfs::new(),
            interpreter: Interpreter::new(),
            programs: HashMap::new(),
            events: Vec::new(),
            unresponsive: false,
            disconnected: false,
            resets: 0,
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.outgoing.extend(bytes.iter().copied());
    }

    fn receive(&mut self, byte: u8) {
        match byte {
            CTRL_A => {
                self.events.push(WireEvent::EnterRaw);
                if let Mode::Running { .. } = self.mode {
                    return;
                }
                self.command.clear();
                self.mode = Mode::Raw;
                self.send(RAW_BANNER);
            }
            CTRL_B => {
                self.events.push(WireEvent::ExitRaw);
                if let Mode::Running { .. } = self.mode {
                    return;
                }
                self.command.clear();
                self.mode = Mode::Friendly;
                self.send(FRIENDLY_BANNER);
            }
            CTRL_C => {
                self.events.push(WireEvent::Interrupt);
                self.command.clear();
                match self.mode {
                    Mode::Friendly => self.send(PROMPT),
                    Mode::Raw => {}
                    Mode::Running { .. } => {
                        let err = PyErr {
                            kind: "KeyboardInterrupt".to_string(),
                            message: String::new(),
                            line: 1,
                        };
                        self.finish_section(Some(err.traceback()));
                    }
                }
            }
            CTRL_D => {
                if let Mode::Raw = self.mode {
                    let source = String::from_utf8_lossy(&self.command).into_owned();
                    self.command.clear();
                    self.execute(source);
                }
            }
            b'\r' => match self.mode {
                Mode::Friendly => self.send(PROMPT),
                Mode::Raw => self.command.push(byte),
                Mode::Running { .. } => {}
            },
            _ => match self.mode {
                Mode::Raw => self.command.push(byte),
                Mode::Friendly | Mode::Running { .. } => {}
            },
        }
    }

    fn execute(&mut self, source: String) {
        debug!("SimDevice: exec {} bytes", source.len());
        self.events.push(WireEvent::Command(source.clone()));
        self.send(b"OK");

        if let Some(program) = self.programs.get(&source).cloned() {
            self.mode = Mode::Running { program, emitted: 0 };
            return;
        }

        let (stdout, result) = self.interpreter.run(&source, &mut self.vfs);
        self.send(&stdout);
        match result {
            Ok(()) => self.finish_section(None),
            Err(Flow::Raise(err)) => self.finish_section(Some(err.traceback())),
            Err(Flow::Reset) => self.reset(),
        }
    }

    /// Close the output and error sections and return to the raw prompt.
    fn finish_section(&mut self, error: Option<String>) {
        self.send(&[CTRL_D]);
        if let Some(text) = error {
            self.send(text.as_bytes());
        }
        self.send(&[CTRL_D, b'>']);
        self.mode = Mode::Raw;
    }

    fn reset(&mut self) {
        debug!("SimDevice: reset");
        self.events.push(WireEvent::Reset);
        self.resets += 1;
        self.interpreter = Interpreter::new();
        self.command.clear();
        self.mode = Mode::Friendly;
        self.send(FRIENDLY_BANNER);
    }

    /// Produce program output when the host polls an empty line.
    fn step_program(&mut self) {
        let Mode::Running { program, emitted } = &mut self.mode else {
            return;
        };
        let step = match program {
            Program::Endless { line } => {
                *emitted += 1;
                Ok(format!("{}\r\n", line).into_bytes())
            }
            Program::Finite { chunks, error } => match chunks.get(*emitted) {
                Some(chunk) => {
                    *emitted += 1;
                    Ok(chunk.clone().into_bytes())
                }
                None => Err(error.clone()),
            },
            Program::Hang => return,
        };
        match step {
            Ok(bytes) => self.send(&bytes),
            Err(error) => {
                let traceback = error.map(|text| {
                    let (kind, message) = text.split_once(':').unwrap_or((text.as_str(), ""));
                    PyErr {
                        kind: kind.trim().to_string(),
                        message: message.trim().to_string(),
                        line: 1,
                    }
                    .traceback()
                });
                self.finish_section(traceback);
            }
        }
    }
}

/// A simulated MicroPython board, usable wherever a [`Transport`] is expected.
///
/// Replies are produced synchronously as bytes are written, so reads never
/// have to wait. Use [`SimDevice::probe`] to inspect and steer the board from tests.
pub struct SimDevice {
    name: String,
    board: Arc<Mutex<Board>>,
    open: bool,
}

impl SimDevice {
    /// A board in the friendly REPL with an empty filesystem.
    pub fn new() -> Self {
        Self::with_name("sim")
    }

    /// Same as [`SimDevice::new`] with a custom port name for log messages.
    pub fn with_name(name: impl Into<String>) -> Self {
        SimDevice {
            name: name.into(),
            board: Arc::new(Mutex::new(Board::new())),
            open: true,
        }
    }

    /// Handle for inspecting the board while the device is owned by an engine.
    pub fn probe(&self) -> DeviceProbe {
        DeviceProbe {
            board: Arc::clone(&self.board),
        }
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimDevice {
    fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut board = self.board.lock();
        if board.disconnected {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device disconnected",
            )));
        }
        trace!("SimDevice[{}]: rx {:02x?}", self.name, bytes);
        if board.unresponsive {
            return Ok(());
        }
        for &byte in bytes {
            board.receive(byte);
        }
        Ok(())
    }

    fn try_read_byte(&mut self) -> TransportResult<Option<u8>> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut board = self.board.lock();
        if board.unresponsive {
            return Ok(None);
        }
        if board.outgoing.is_empty() {
            board.step_program();
        }
        Ok(board.outgoing.pop_front())
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        self.board.lock().outgoing.clear();
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shared view of a [`SimDevice`]'s board.
#[derive(Clone)]
pub struct DeviceProbe {
    board: Arc<Mutex<Board>>,
}

impl DeviceProbe {
    /// Every wire event so far.
    pub fn events(&self) -> Vec<WireEvent> {
        self.board.lock().events.clone()
    }

    /// Only the raw-mode entries and exits, in order.
    pub fn raw_transitions(&self) -> Vec<WireEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, WireEvent::EnterRaw | WireEvent::ExitRaw))
            .collect()
    }

    /// Number of times the host entered raw mode.
    pub fn enter_count(&self) -> usize {
        self.count(|e| *e == WireEvent::EnterRaw)
    }

    /// Number of times the host left raw mode.
    pub fn exit_count(&self) -> usize {
        self.count(|e| *e == WireEvent::ExitRaw)
    }

    /// Sources submitted in raw mode, in order.
    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WireEvent::Command(source) => Some(source),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&WireEvent) -> bool) -> usize {
        self.board.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Module calls (e.g. `os.remove`) made by executed code.
    pub fn calls(&self) -> Vec<Call> {
        self.board.lock().interpreter.calls().to_vec()
    }

    /// Number of recorded calls to `function`.
    pub fn call_count(&self, function: &str) -> usize {
        self.board.lock().interpreter.calls().iter().filter(|c| c.function == function).count()
    }

    /// Forget recorded events and calls.
    pub fn clear_log(&self) {
        let mut board = self.board.lock();
        board.events.clear();
        board.interpreter.clear_calls();
    }

    /// Create a file with `contents`, creating parent directories as needed.
    pub fn write_file(&self, path: &str, contents: &[u8]) {
        let mut board = self.board.lock();
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() {
                let _ = board.vfs.mkdir_all(parent);
            }
        }
        if board.vfs.truncate(path).is_ok() {
            let _ = board.vfs.append(path, contents);
        }
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, path: &str) {
        let _ = self.board.lock().vfs.mkdir_all(path);
    }

    /// Contents of a file, or `None` if there is no file at `path`.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.board.lock().vfs.read(path).ok().map(<[u8]>::to_vec)
    }

    /// Whether anything exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.board.lock().vfs.stat(path).is_ok()
    }

    /// Whether `path` is a directory.
    pub fn is_dir(&self, path: &str) -> bool {
        self.board.lock().vfs.stat(path).map(|s| s.is_dir).unwrap_or(false)
    }

    /// Entry names of a directory.
    pub fn listdir(&self, path: &str) -> Option<Vec<String>> {
        self.board.lock().vfs.listdir(path).ok()
    }

    /// Files opened by executed code and never closed.
    pub fn open_file_count(&self) -> usize {
        self.board.lock().interpreter.open_file_count()
    }

    /// Run `program` whenever exactly `source` is submitted.
    pub fn install_program(&self, source: impl Into<String>, program: Program) {
        self.board.lock().programs.insert(source.into(), program);
    }

    /// Make the board ignore input and stay silent.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.board.lock().unresponsive = unresponsive;
    }

    /// Make every further write fail as if the cable was pulled.
    pub fn disconnect(&self) {
        self.board.lock().disconnected = true;
    }

    /// Whether the board is currently in raw mode (idle or running).
    pub fn in_raw_mode(&self) -> bool {
        !matches!(self.board.lock().mode, Mode::Friendly)
    }

    /// Whether a streaming program is still running.
    pub fn is_running(&self) -> bool {
        matches!(self.board.lock().mode, Mode::Running { .. })
    }

    /// How many times the board reset.
    pub fn reset_count(&self) -> usize {
        self.board.lock().resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(device: &mut SimDevice) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = device.try_read_byte().unwrap() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_raw_round_trip() {
        let mut device = SimDevice::new();
        device.write(b"\r\x01").unwrap();
        let banner = drain(&mut device);
        assert!(banner.ends_with(RAW_BANNER));

        device.write(b"print('hi')\x04").unwrap();
        assert_eq!(drain(&mut device), b"OKhi\r\n\x04\x04>");

        device.write(b"\r\x02").unwrap();
        assert!(!device.probe().in_raw_mode());
    }

    #[test]
    fn test_error_section_carries_traceback() {
        let mut device = SimDevice::new();
        device.write(b"\x01").unwrap();
        drain(&mut device);
        device.write(b"import os\nos.rmdir('/x')\x04").unwrap();
        let reply = String::from_utf8(drain(&mut device)).unwrap();
        assert!(reply.starts_with("OK\x04Traceback"));
        assert!(reply.ends_with("OSError: [Errno 2] ENOENT\r\n\x04>"));
    }

    #[test]
    fn test_interrupt_stops_endless_program() {
        let mut device = SimDevice::new();
        let probe = device.probe();
        probe.install_program("loop()", Program::Endless { line: "tick".into() });
        device.write(b"\x01").unwrap();
        drain(&mut device);
        device.write(b"loop()\x04").unwrap();
        for _ in 0..16 {
            device.try_read_byte().unwrap();
        }
        assert!(probe.is_running());

        device.write(b"\r\x03").unwrap();
        let tail = String::from_utf8(drain(&mut device)).unwrap();
        assert!(tail.contains("\x04Traceback"));
        assert!(tail.ends_with("KeyboardInterrupt: \r\n\x04>"));
        assert!(!probe.is_running());
    }

    #[test]
    fn test_reset_returns_to_friendly_prompt() {
        let mut device = SimDevice::new();
        let probe = device.probe();
        device.write(b"\x01").unwrap();
        drain(&mut device);
        device.write(b"import machine\nmachine.reset()\x04").unwrap();
        let reply = drain(&mut device);
        assert!(reply.ends_with(b">>> "));
        assert_eq!(probe.reset_count(), 1);
        assert!(!probe.in_raw_mode());
    }

    #[test]
    fn test_unresponsive_board_is_silent() {
        let mut device = SimDevice::new();
        device.probe().set_unresponsive(true);
        device.write(b"\r\x01").unwrap();
        assert!(drain(&mut device).is_empty());
    }
}
