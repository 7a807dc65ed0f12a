// src/shell/executor.rs
use crate::shell::command_parser::ParsedLine;
use crate::shell::job_control::JobSink;
use crate::shell::redirect::{self, exit_child, fail_redirect};
use crate::shell::signal_handler::SignalHandler;
use anyhow::{Context, Result};
use log::debug;
use nix::errno::Errno;
use nix::unistd::{self, ForkResult};
use std::ffi::CString;
use std::os::unix::io::RawFd;

pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    Inherit,
    /// The line's `<` file.
    Redirect,
    /// Background jobs never read the terminal.
    NullDevice,
    /// Read end of pipe `n`.
    Pipe(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutput {
    Inherit,
    /// The line's `>` file.
    Redirect,
    /// Write end of pipe `n`.
    Pipe(usize),
}

/// Where one stage of a pipeline reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageWiring {
    pub input: StageInput,
    pub output: StageOutput,
}

impl StageWiring {
    pub fn plan(index: usize, count: usize, line: &ParsedLine) -> Self {
        let input = if index > 0 {
            StageInput::Pipe(index - 1)
        } else if line.input.is_some() {
            StageInput::Redirect
        } else if line.background {
            StageInput::NullDevice
        } else {
            StageInput::Inherit
        };

        let output = if index + 1 < count {
            StageOutput::Pipe(index)
        } else if line.output.is_some() {
            StageOutput::Redirect
        } else {
            StageOutput::Inherit
        };

        StageWiring { input, output }
    }
}

struct PreparedStage {
    argv: Vec<CString>,
    wiring: StageWiring,
}

/// A parsed line converted to C strings ahead of forking, so children never
/// allocate.
pub struct PreparedPipeline {
    stages: Vec<PreparedStage>,
    input: Option<CString>,
    output: Option<CString>,
    null_device: CString,
    background: bool,
}

impl PreparedPipeline {
    pub fn new(line: &ParsedLine, null_device: &str) -> Result<Self> {
        let count = line.commands.len();
        let stages = line
            .commands
            .iter()
            .enumerate()
            .map(|(index, command)| -> Result<PreparedStage> {
                let argv = command
                    .argv()
                    .into_iter()
                    .map(CString::new)
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("{}: argument contains a NUL byte", command.program))?;
                Ok(PreparedStage {
                    argv,
                    wiring: StageWiring::plan(index, count, line),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PreparedPipeline {
            stages,
            input: c_path(line.input.as_deref())?,
            output: c_path(line.output.as_deref())?,
            null_device: CString::new(null_device).context("null device path contains a NUL byte")?,
            background: line.background,
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }
}

fn c_path(path: Option<&str>) -> Result<Option<CString>> {
    path.map(|p| CString::new(p).with_context(|| format!("{}: file name contains a NUL byte", p)))
        .transpose()
}

#[derive(Debug, Default)]
struct PipeEnds {
    read: Option<RawFd>,
    write: Option<RawFd>,
}

/// The N-1 pipes of an N-stage pipeline. Ends are set to `None` as they are
/// closed; whatever is still open is closed on drop.
struct Pipes {
    ends: Vec<PipeEnds>,
}

impl Pipes {
    fn create(count: usize) -> Result<Self> {
        let mut pipes = Pipes {
            ends: Vec::with_capacity(count),
        };
        for _ in 0..count {
            let (read, write) = unistd::pipe().context("Failed to create pipe")?;
            pipes.ends.push(PipeEnds {
                read: Some(read),
                write: Some(write),
            });
        }
        Ok(pipes)
    }

    fn read_end(&self, index: usize) -> Option<RawFd> {
        self.ends.get(index).and_then(|ends| ends.read)
    }

    fn write_end(&self, index: usize) -> Option<RawFd> {
        self.ends.get(index).and_then(|ends| ends.write)
    }

    fn close_read(&mut self, index: usize) {
        if let Some(fd) = self.ends.get_mut(index).and_then(|ends| ends.read.take()) {
            let _ = unistd::close(fd);
        }
    }

    fn close_write(&mut self, index: usize) {
        if let Some(fd) = self.ends.get_mut(index).and_then(|ends| ends.write.take()) {
            let _ = unistd::close(fd);
        }
    }

    fn close_all(&mut self) {
        for index in 0..self.ends.len() {
            self.close_read(index);
            self.close_write(index);
        }
    }

    fn open_count(&self) -> usize {
        self.ends
            .iter()
            .map(|ends| ends.read.is_some() as usize + ends.write.is_some() as usize)
            .sum()
    }
}

impl Drop for Pipes {
    fn drop(&mut self) {
        self.close_all();
    }
}

pub struct Executor;

impl Executor {
    /// Forks one child per stage and hands every pid to `jobs`.
    ///
    /// Errors are failures of the shell itself (no pipe, no fork) and are not
    /// recoverable. Failures inside a child only affect that child.
    pub fn spawn<S>(pipeline: &PreparedPipeline, jobs: &mut S) -> Result<usize>
    where
        S: JobSink + ?Sized,
    {
        let count = pipeline.len();
        let mut pipes = Pipes::create(count.saturating_sub(1))?;
        debug!("spawning {} stage(s) with {} pipe(s)", count, pipes.ends.len());

        for (index, stage) in pipeline.stages.iter().enumerate() {
            match unsafe { unistd::fork() }.context("Failed to fork")? {
                ForkResult::Child => Self::exec_stage(pipeline, stage, &mut pipes),
                ForkResult::Parent { child } => {
                    debug!("forked {} for stage {} ({:?})", child, index, stage.wiring);
                    // The child owns these ends now.
                    pipes.close_write(index);
                    if index > 0 {
                        pipes.close_read(index - 1);
                    }
                    jobs.track(child)?;
                }
            }
        }

        debug_assert_eq!(pipes.open_count(), 0);
        Ok(count)
    }

    /// Runs in the child: wire descriptors, then exec. Never returns.
    fn exec_stage(pipeline: &PreparedPipeline, stage: &PreparedStage, pipes: &mut Pipes) -> ! {
        let program = stage.argv[0].as_bytes();

        let pipe_in = match stage.wiring.input {
            StageInput::Pipe(n) => pipes.read_end(n),
            _ => None,
        };
        let pipe_out = match stage.wiring.output {
            StageOutput::Pipe(n) => pipes.write_end(n),
            _ => None,
        };
        if let Some(fd) = pipe_in {
            if unistd::dup2(fd, libc::STDIN_FILENO).is_err() {
                exit_child(program, "dup2", redirect::EXIT_REDIRECT_FAILED);
            }
        }
        if let Some(fd) = pipe_out {
            if unistd::dup2(fd, libc::STDOUT_FILENO).is_err() {
                exit_child(program, "dup2", redirect::EXIT_REDIRECT_FAILED);
            }
        }
        pipes.close_all();

        let input = match stage.wiring.input {
            StageInput::Redirect => pipeline.input.as_deref(),
            StageInput::NullDevice => Some(pipeline.null_device.as_c_str()),
            _ => None,
        };
        if let Some(path) = input {
            if let Err(failure) = redirect::bind_input(path) {
                fail_redirect(path, failure);
            }
        }
        if stage.wiring.output == StageOutput::Redirect {
            if let Some(path) = pipeline.output.as_deref() {
                if let Err(failure) = redirect::bind_output(path) {
                    fail_redirect(path, failure);
                }
            }
        }

        if SignalHandler::restore_pipe().is_err() {
            exit_child(program, "sigaction", redirect::EXIT_REDIRECT_FAILED);
        }
        if !pipeline.background && SignalHandler::restore_interrupt().is_err() {
            exit_child(program, "sigaction", redirect::EXIT_REDIRECT_FAILED);
        }

        let errno = match unistd::execvp(&stage.argv[0], &stage.argv) {
            Err(errno) => errno,
            Ok(never) => match never {},
        };
        if errno == Errno::ENOENT {
            exit_child(program, "command not found", EXIT_NOT_FOUND)
        } else {
            exit_child(program, errno.desc(), EXIT_NOT_EXECUTABLE)
        }
    }
}
