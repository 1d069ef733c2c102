//! Control of a server running in another process.
//!
//! Liveness is checked with signal 0; termination uses SIGTERM and reload
//! uses SIGUSR1. Targets without signals get [`DetachedProcessControl`],
//! which reports every pid as absent.

use std::io;

/// Signal-style control over a process identified by pid.
pub trait ProcessControl: Send + Sync {
    /// True if a process with this pid accepts signals from us.
    fn is_alive(&self, pid: i32) -> bool;

    fn terminate(&self, pid: i32) -> io::Result<()>;

    fn reload(&self, pid: i32) -> io::Result<()>;
}

/// `kill(2)` based control.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProcessControl;

#[cfg(unix)]
impl SignalProcessControl {
    fn send(pid: i32, signal: Option<nix::sys::signal::Signal>) -> io::Result<()> {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal).map_err(io::Error::from)
    }
}

#[cfg(unix)]
impl ProcessControl for SignalProcessControl {
    fn is_alive(&self, pid: i32) -> bool {
        Self::send(pid, None).is_ok()
    }

    fn terminate(&self, pid: i32) -> io::Result<()> {
        tracing::info!(pid, "Sending SIGTERM");
        Self::send(pid, Some(nix::sys::signal::Signal::SIGTERM))
    }

    fn reload(&self, pid: i32) -> io::Result<()> {
        tracing::info!(pid, "Sending SIGUSR1");
        Self::send(pid, Some(nix::sys::signal::Signal::SIGUSR1))
    }
}

/// Control for platforms without signals: nothing is ever found running.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedProcessControl;

impl ProcessControl for DetachedProcessControl {
    fn is_alive(&self, _pid: i32) -> bool {
        false
    }

    fn terminate(&self, _pid: i32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process signals are not available on this platform",
        ))
    }

    fn reload(&self, pid: i32) -> io::Result<()> {
        self.terminate(pid)
    }
}

/// The control mechanism for the current platform.
#[cfg(unix)]
pub fn platform_default() -> std::sync::Arc<dyn ProcessControl> {
    std::sync::Arc::new(SignalProcessControl)
}

#[cfg(not(unix))]
pub fn platform_default() -> std::sync::Arc<dyn ProcessControl> {
    std::sync::Arc::new(DetachedProcessControl)
}
