//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Foreground (this process runs the event loop):
//!     RunningServerHandle → Engine::shutdown / Engine::reload
//!     signals.rs: SIGTERM/SIGINT → shutdown, SIGUSR1 → reload, for as long
//!     as a loop forwards them
//!     shutdown.rs: fan-out to accept loops and connections
//!
//! Background (another process runs it):
//!     pid.rs (read recorded pid)
//!     → process.rs (check with signal 0, then SIGTERM / SIGUSR1)
//! ```
//!
//! # Design Decisions
//! - A failed liveness check means "not running", never an error
//! - The handle never forks; daemonizing is the engine's job

pub mod pid;
pub mod process;
pub mod shutdown;
pub mod signals;

pub use pid::PidFile;
pub use process::{DetachedProcessControl, ProcessControl};
#[cfg(unix)]
pub use process::SignalProcessControl;
pub use shutdown::Shutdown;
pub use signals::ControlCommand;
