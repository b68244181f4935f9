//! Simulated MicroPython Board
//!
//! [`SimDevice`] implements [`upyrepl_transport::Transport`] and behaves like a
//! board on the other end of a serial cable: it has a friendly REPL, a raw REPL,
//! an in-memory flash filesystem, and a small interpreter covering the Python
//! the host generates for file management. Tests drive it through the real
//! protocol engine and inspect it through a [`DeviceProbe`].
//!
//! ```rust,ignore
//! use upyrepl_sim::SimDevice;
//!
//! let device = SimDevice::new();
//! let probe = device.probe();
//! probe.write_file("/main.py", b"print('hi')");
//! let engine = ReplEngine::new(device, EngineConfig::default());
//! engine.execute("exec(open('/main.py').read())")?;
//! assert_eq!(probe.enter_count(), probe.exit_count());
//! ```

mod device;
mod interp;
mod vfs;

pub use device::{DeviceProbe, Program, SimDevice, WireEvent};
pub use interp::{Call, Flow, Interpreter, PyErr, Value};
pub use vfs::{Errno, Node, Stat, Vfs};
