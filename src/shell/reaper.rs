use crate::shell::job_control::{JobRegistry, JobSink, TerminationReport};
use crate::shell::signal_handler::SignalHandler;
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use signal_hook::iterator::Handle;
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperEvent {
    /// A background job was forked.
    Track(Pid),
    /// At least one child changed state.
    ChildExited,
    Shutdown,
}

/// Owner of the background registry. Only the reaper thread touches it.
pub struct Reaper<W: Write> {
    registry: JobRegistry,
    out: W,
}

impl<W: Write> Reaper<W> {
    pub fn new(capacity: usize, out: W) -> Self {
        Reaper {
            registry: JobRegistry::new(capacity),
            out,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Returns `false` once the reaper should stop.
    pub fn handle(&mut self, event: ReaperEvent) -> bool {
        match event {
            ReaperEvent::Track(pid) => {
                debug!("tracking background job {}", pid);
                self.registry.push(pid);
                // The child may already have exited before it was tracked.
                self.sweep();
                true
            }
            ReaperEvent::ChildExited => {
                self.sweep();
                true
            }
            ReaperEvent::Shutdown => false,
        }
    }

    /// Reaps every background job that has already terminated, in registry
    /// order, without blocking.
    pub fn sweep(&mut self) -> Vec<TerminationReport> {
        let mut reports = Vec::new();
        let mut index = 0;

        while let Some(pid) = self.registry.get(index) {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => index += 1,
                Ok(status) => match TerminationReport::from_wait_status(status) {
                    Some(report) => {
                        report.emit(&mut self.out);
                        self.registry.remove(index);
                        reports.push(report);
                    }
                    None => index += 1,
                },
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("waitpid({}) failed, dropping job: {}", pid, e);
                    self.registry.remove(index);
                }
            }
        }

        reports
    }

    fn run(mut self, events: Receiver<ReaperEvent>) {
        for event in events {
            if !self.handle(event) {
                break;
            }
        }
        self.registry.destroy();
    }
}

/// Main-thread side of the reaper: a channel into the reaper thread.
pub struct ReaperHandle {
    tx: Sender<ReaperEvent>,
    worker: Option<JoinHandle<()>>,
    signals: Option<Handle>,
}

impl ReaperHandle {
    pub fn start<W>(capacity: usize, out: W) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let reaper = Reaper::new(capacity, out);
        let worker = thread::Builder::new()
            .name("reaper".to_string())
            .spawn(move || reaper.run(rx))
            .context("Failed to start the background reaper")?;

        Ok(ReaperHandle {
            tx,
            worker: Some(worker),
            signals: None,
        })
    }

    /// Sweeps the background registry on every SIGCHLD.
    pub fn listen_for_children(mut self) -> Result<Self> {
        let handle = SignalHandler::forward_child_exits(self.tx.clone())
            .context("Failed to install the SIGCHLD listener")?;
        self.signals = Some(handle);
        Ok(self)
    }

    #[cfg(test)]
    pub fn notify(&self) {
        let _ = self.tx.send(ReaperEvent::ChildExited);
    }

    /// Stops the reaper. Jobs still running are abandoned, not waited for.
    pub fn shutdown(&mut self) {
        if let Some(signals) = self.signals.take() {
            signals.close();
        }
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(ReaperEvent::Shutdown);
            if worker.join().is_err() {
                warn!("background reaper panicked");
            }
        }
    }
}

impl JobSink for ReaperHandle {
    fn track(&mut self, pid: Pid) -> Result<()> {
        self.tx
            .send(ReaperEvent::Track(pid))
            .map_err(|_| anyhow!("background reaper is not running"))
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
