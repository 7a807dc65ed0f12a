use crate::shell::reaper::ReaperEvent;
use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use signal_hook::consts::SIGCHLD;
use signal_hook::iterator::{Handle, Signals};
use std::io;
use std::sync::mpsc::Sender;
use std::thread;

pub struct SignalHandler;

impl SignalHandler {
    /// Makes the shell itself immune to Ctrl+C.
    pub fn initialize() -> Result<(), nix::Error> {
        debug!("Ignoring SIGINT in the shell process");
        Self::set_interrupt(SigHandler::SigIgn)
    }

    /// Called in a forked foreground child right before exec.
    /// Only touches the signal table, so it is safe after fork.
    pub fn restore_interrupt() -> Result<(), nix::Error> {
        Self::set_interrupt(SigHandler::SigDfl)
    }

    /// The Rust runtime ignores SIGPIPE and that survives exec, so every
    /// child puts it back before running its program.
    pub fn restore_pipe() -> Result<(), nix::Error> {
        Self::set_handler(Signal::SIGPIPE, SigHandler::SigDfl)
    }

    fn set_interrupt(handler: SigHandler) -> Result<(), nix::Error> {
        Self::set_handler(Signal::SIGINT, handler)
    }

    fn set_handler(sig: Signal, handler: SigHandler) -> Result<(), nix::Error> {
        let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
        unsafe { signal::sigaction(sig, &action)? };
        Ok(())
    }

    /// Turns every SIGCHLD delivery into a `ChildExited` event on `tx`.
    ///
    /// The actual signal handler only wakes the forwarding thread; nothing
    /// else runs in signal context. Closing the returned handle stops the
    /// thread.
    pub fn forward_child_exits(tx: Sender<ReaperEvent>) -> io::Result<Handle> {
        let mut signals = Signals::new(&[SIGCHLD])?;
        let handle = signals.handle();

        thread::Builder::new()
            .name("sigchld".to_string())
            .spawn(move || {
                for _ in signals.forever() {
                    if tx.send(ReaperEvent::ChildExited).is_err() {
                        break;
                    }
                }
                debug!("SIGCHLD forwarder stopped");
            })?;

        Ok(handle)
    }
}
