mod builtin;
mod command_parser;
mod executor;
mod expand;
mod job_control;
mod reaper;
mod redirect;
mod signal_handler;

use crate::config::Config;
use crate::terminal::{LineInput, Terminal};
use anyhow::{Context, Result};
use builtin::{Builtin, BuiltinOutcome};
use command_parser::{CommandParser, ParsedLine};
use executor::{Executor, PreparedPipeline};
use job_control::{wait_foreground, JobRegistry};
use log::debug;
use reaper::ReaperHandle;
use signal_handler::SignalHandler;
use std::io::{self, StdinLock, Stdout};
use std::sync::Arc;

pub struct Shell {
    terminal: Terminal<StdinLock<'static>, Stdout>,
    reaper: ReaperHandle,
    config: Arc<Config>,
}

impl Shell {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        SignalHandler::initialize().context("Failed to ignore SIGINT")?;

        let reaper = ReaperHandle::start(config.registry_capacity, io::stderr())?
            .listen_for_children()?;

        Ok(Shell {
            terminal: Terminal::new(config.max_line_length),
            reaper,
            config,
        })
    }

    /// Runs the read loop and returns the shell's exit status.
    pub fn run(&mut self) -> Result<i32> {
        loop {
            let input = match self.terminal.read_line()? {
                LineInput::Line(input) => input,
                LineInput::TooLong => {
                    eprintln!("jobsh: input line too long");
                    continue;
                }
                LineInput::NotUtf8 => {
                    eprintln!("jobsh: input is not valid UTF-8");
                    continue;
                }
                LineInput::Eof => {
                    debug!("end of input");
                    self.reaper.shutdown();
                    return Ok(0);
                }
            };

            if let BuiltinOutcome::Exit(code) = self.execute_line(&input)? {
                // Background jobs still running are abandoned.
                self.reaper.shutdown();
                return Ok(code);
            }
        }
    }

    fn execute_line(&mut self, input: &str) -> Result<BuiltinOutcome> {
        let line = match CommandParser::parse(input) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("jobsh: {}", e);
                return Ok(BuiltinOutcome::Continue);
            }
        };
        if line.is_empty() {
            return Ok(BuiltinOutcome::Continue);
        }

        if let Some(builtin) = Self::find_builtin(&line) {
            if line.commands.len() > 1 {
                // Checked before anything is forked, so nothing is left behind.
                eprintln!("jobsh: {}: builtin cannot be used in a pipeline", builtin.name());
                return Ok(BuiltinOutcome::Continue);
            }
            debug!("running builtin {}", builtin.name());
            return Ok(builtin.run(&line.commands[0], &mut io::stderr()));
        }

        let pipeline = match PreparedPipeline::new(&line, &self.config.null_device) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                eprintln!("jobsh: {:#}", e);
                return Ok(BuiltinOutcome::Continue);
            }
        };

        if line.background {
            Executor::spawn(&pipeline, &mut self.reaper)?;
        } else {
            let mut foreground = JobRegistry::new(self.config.registry_capacity);
            Executor::spawn(&pipeline, &mut foreground)?;
            wait_foreground(&mut foreground, &mut io::stderr());
            foreground.destroy();
        }

        Ok(BuiltinOutcome::Continue)
    }

    fn find_builtin(line: &ParsedLine) -> Option<Builtin> {
        line.commands
            .iter()
            .find_map(|command| Builtin::lookup(&command.program))
    }
}
