//! OS signals → lifecycle commands for a foreground event loop.
//!
//! SIGTERM and SIGINT request shutdown; SIGUSR1 requests a worker reload.
//! These are the signals `SignalProcessControl` sends to a background server.
//!
//! Forwarding lasts as long as the returned [`SignalForwarding`]. Once the
//! last one is dropped the process gets the default dispositions back, so a
//! stopped loop no longer swallows SIGTERM or Ctrl-C.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Request to the running event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    Reload,
}

/// Signals forwarded into a control channel; stops forwarding when dropped.
#[derive(Debug)]
pub struct SignalForwarding {
    task: JoinHandle<()>,
}

impl Drop for SignalForwarding {
    fn drop(&mut self) {
        self.task.abort();
        #[cfg(unix)]
        disposition::release();
    }
}

/// Start forwarding signals to `tx`. Must be called inside a tokio runtime.
#[cfg(unix)]
pub fn forward_signals(
    tx: mpsc::UnboundedSender<ControlCommand>,
) -> std::io::Result<SignalForwarding> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    disposition::acquire()?;

    let task = tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = terminate.recv() => ControlCommand::Shutdown,
                _ = interrupt.recv() => ControlCommand::Shutdown,
                _ = user1.recv() => ControlCommand::Reload,
            };
            tracing::info!(?command, "Signal received");
            if tx.send(command).is_err() {
                return;
            }
        }
    });
    Ok(SignalForwarding { task })
}

#[cfg(not(unix))]
pub fn forward_signals(
    tx: mpsc::UnboundedSender<ControlCommand>,
) -> std::io::Result<SignalForwarding> {
    let task = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received");
            if tx.send(ControlCommand::Shutdown).is_err() {
                return;
            }
        }
    });
    Ok(SignalForwarding { task })
}

/// Process-wide bookkeeping of who owns the forwarded signals.
///
/// tokio installs its handlers once per process and never removes them.
/// While no loop forwards, those handlers are parked here and the default
/// dispositions are in place.
#[cfg(unix)]
mod disposition {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    pub(super) const FORWARDED: [Signal; 3] = [Signal::SIGTERM, Signal::SIGINT, Signal::SIGUSR1];

    struct Owners {
        active: usize,
        parked: Vec<(Signal, SigAction)>,
    }

    static OWNERS: Mutex<Owners> = Mutex::new(Owners {
        active: 0,
        parked: Vec::new(),
    });

    fn owners() -> MutexGuard<'static, Owners> {
        OWNERS.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reinstall parked runtime handlers for a new forwarding scope.
    pub(super) fn acquire() -> std::io::Result<()> {
        let mut owners = owners();
        while let Some((signal, action)) = owners.parked.pop() {
            // SAFETY: the action is the runtime's own handler, taken out by `release`.
            unsafe { sigaction(signal, &action) }?;
        }
        owners.active += 1;
        Ok(())
    }

    /// End a forwarding scope; the last one restores default dispositions.
    pub(super) fn release() {
        let mut owners = owners();
        owners.active = owners.active.saturating_sub(1);
        if owners.active > 0 {
            return;
        }
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for signal in FORWARDED {
            // SAFETY: SIG_DFL runs no handler code.
            match unsafe { sigaction(signal, &default) } {
                Ok(previous) => owners.parked.push((signal, previous)),
                Err(err) => tracing::warn!(%signal, error = %err, "Could not restore signal disposition"),
            }
        }
        tracing::debug!("Signal dispositions restored");
    }
}
