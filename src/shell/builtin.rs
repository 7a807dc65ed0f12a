use crate::shell::command_parser::SimpleCommand;
use crate::shell::expand::expand_word;
use log::debug;
use nix::unistd;
use std::env;
use std::io::Write;

/// Commands that must run inside the shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exit,
    Cd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOutcome {
    Continue,
    Exit(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CdTarget {
    Home,
    Path(String),
    TooManyArguments,
}

impl CdTarget {
    fn from_args(args: &[String]) -> Self {
        match args {
            [] => CdTarget::Home,
            [path] => CdTarget::Path(path.clone()),
            _ => CdTarget::TooManyArguments,
        }
    }
}

impl Builtin {
    pub fn lookup(program: &str) -> Option<Builtin> {
        match program {
            "exit" => Some(Builtin::Exit),
            "cd" => Some(Builtin::Cd),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Exit => "exit",
            Builtin::Cd => "cd",
        }
    }

    /// Runs the builtin. Failures are written to `err` and never abort the shell.
    pub fn run<W: Write>(&self, command: &SimpleCommand, err: &mut W) -> BuiltinOutcome {
        match self {
            Builtin::Exit => BuiltinOutcome::Exit(0),
            Builtin::Cd => {
                change_directory(&command.args, err);
                BuiltinOutcome::Continue
            }
        }
    }
}

fn change_directory<W: Write>(args: &[String], err: &mut W) {
    let dir = match CdTarget::from_args(args) {
        CdTarget::Home => match env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(err, "cd: HOME not set");
                return;
            }
        },
        CdTarget::Path(arg) => {
            // Only the first expansion is used, like `cd` with a glob in sh.
            let mut expanded = expand_word(&arg).into_iter();
            expanded.next().unwrap_or(arg)
        }
        CdTarget::TooManyArguments => {
            let _ = writeln!(err, "cd : too many arguments");
            return;
        }
    };

    debug!("cd {}", dir);
    if let Err(errno) = unistd::chdir(dir.as_str()) {
        let _ = writeln!(err, "cd: {}", errno.desc());
    }
}
