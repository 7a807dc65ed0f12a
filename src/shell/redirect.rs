//! Descriptor rebinding for freshly forked children.
//!
//! Everything in here runs between `fork` and `exec` in a process that may
//! have been forked from a multi-threaded parent, so nothing allocates: paths
//! arrive as prepared C strings and failures are written with raw `write(2)`.

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::ffi::CStr;
use std::os::unix::io::RawFd;

pub const EXIT_REDIRECT_FAILED: i32 = 1;

/// The step that failed in a child and the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildFailure {
    pub step: &'static str,
    pub errno: Errno,
}

impl ChildFailure {
    fn at(step: &'static str) -> impl Fn(Errno) -> ChildFailure {
        move |errno| ChildFailure { step, errno }
    }
}

pub fn bind_input(path: &CStr) -> Result<(), ChildFailure> {
    bind(path, OFlag::O_RDONLY, libc::STDIN_FILENO)
}

pub fn bind_output(path: &CStr) -> Result<(), ChildFailure> {
    bind(
        path,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        libc::STDOUT_FILENO,
    )
}

fn bind(path: &CStr, flags: OFlag, target: RawFd) -> Result<(), ChildFailure> {
    let mode = Mode::from_bits_truncate(0o644);
    let fd = fcntl::open(path, flags, mode).map_err(ChildFailure::at("open"))?;
    rebind(fd, target)
}

/// Makes `target` refer to what `fd` refers to and releases `fd`.
pub fn rebind(fd: RawFd, target: RawFd) -> Result<(), ChildFailure> {
    if fd == target {
        return Ok(());
    }
    unistd::dup2(fd, target).map_err(ChildFailure::at("dup2"))?;
    unistd::close(fd).map_err(ChildFailure::at("close"))?;
    Ok(())
}

/// Writes `jobsh: <subject>: <reason>` to stderr and leaves the child.
pub fn exit_child(subject: &[u8], reason: &str, code: i32) -> ! {
    let parts: [&[u8]; 5] = [b"jobsh: ", subject, b": ", reason.as_bytes(), b"\n"];
    for part in parts {
        let _ = unistd::write(libc::STDERR_FILENO, part);
    }
    unsafe { libc::_exit(code) }
}

pub fn fail_redirect(path: &CStr, failure: ChildFailure) -> ! {
    let reason = if failure.step == "open" {
        failure.errno.desc()
    } else {
        failure.step
    };
    exit_child(path.to_bytes(), reason, EXIT_REDIRECT_FAILED)
}
