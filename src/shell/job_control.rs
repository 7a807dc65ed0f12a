use anyhow::Result;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::fmt;
use std::io::Write;

/// Ordered collection of live process ids.
///
/// Capacity starts at the value given to [`JobRegistry::new`] and doubles
/// whenever a push would overflow it. It never shrinks.
#[derive(Debug)]
pub struct JobRegistry {
    pids: Vec<Pid>,
    capacity: usize,
}

impl JobRegistry {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        JobRegistry {
            pids: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, pid: Pid) {
        if self.pids.len() == self.capacity {
            self.capacity *= 2;
            self.pids.reserve_exact(self.capacity - self.pids.len());
        }
        self.pids.push(pid);
    }

    /// Removes the entry at `index`, shifting the later entries left.
    /// Out of range indices are ignored.
    pub fn remove(&mut self, index: usize) -> Option<Pid> {
        if index < self.pids.len() {
            Some(self.pids.remove(index))
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<Pid> {
        self.pids.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        self.pids.iter().copied()
    }

    pub fn destroy(self) {
        if !self.is_empty() {
            debug!("dropping registry with {} untracked job(s)", self.len());
        }
    }
}

/// Destination for the pids produced while a pipeline is built.
pub trait JobSink {
    fn track(&mut self, pid: Pid) -> Result<()>;
}

impl JobSink for JobRegistry {
    fn track(&mut self, pid: Pid) -> Result<()> {
        self.push(pid);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Exited(i32),
    Signaled(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    pub pid: Pid,
    pub status: JobStatus,
}

impl TerminationReport {
    /// Returns `None` for wait results that do not mean termination.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(pid, code) => Some(TerminationReport {
                pid,
                status: JobStatus::Exited(code),
            }),
            WaitStatus::Signaled(pid, signal, _) => Some(TerminationReport {
                pid,
                status: JobStatus::Signaled(signal as i32),
            }),
            _ => None,
        }
    }

    pub fn emit<W: Write>(&self, out: &mut W) {
        // A closed stderr must not take the shell down with it.
        let _ = writeln!(out, "{}", self);
        let _ = out.flush();
    }
}

impl fmt::Display for TerminationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.status {
            JobStatus::Exited(code) => {
                write!(f, "Process {} finished normally code={}", self.pid, code)
            }
            JobStatus::Signaled(signal) => {
                write!(f, "Process {} killed by signal : {}", self.pid, signal)
            }
        }
    }
}

/// Blocks until every job in `registry` has terminated.
///
/// Jobs are visited round-robin: after a reap the cursor still advances, and it
/// wraps to the front once it runs past the end.
pub fn wait_foreground<W: Write>(
    registry: &mut JobRegistry,
    out: &mut W,
) -> Vec<TerminationReport> {
    let mut reports = Vec::with_capacity(registry.len());
    let mut index = 0;

    while !registry.is_empty() {
        if index >= registry.len() {
            index = 0;
        }
        let pid = match registry.get(index) {
            Some(pid) => pid,
            None => break,
        };

        match waitpid(pid, None) {
            Ok(status) => match TerminationReport::from_wait_status(status) {
                Some(report) => {
                    report.emit(out);
                    registry.remove(index);
                    reports.push(report);
                }
                None => debug!("ignoring wait status {:?}", status),
            },
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("waitpid({}) failed: {}", pid, e);
                registry.remove(index);
            }
        }
        index += 1;
    }

    reports
}
