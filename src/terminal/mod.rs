use anyhow::{Context, Result};
use std::env;
use std::io::{self, BufRead, Read, Stdin, StdinLock, Stdout, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    Line(String),
    /// The line exceeded the configured limit and was thrown away.
    TooLong,
    /// The line was not valid UTF-8 and was thrown away.
    NotUtf8,
    Eof,
}

pub struct Terminal<R, W> {
    input: R,
    output: W,
    max_line_length: usize,
}

impl Terminal<StdinLock<'static>, Stdout> {
    pub fn new(max_line_length: usize) -> Self {
        let stdin: Stdin = io::stdin();
        Terminal::with_io(stdin.lock(), io::stdout(), max_line_length)
    }
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    pub fn with_io(input: R, output: W, max_line_length: usize) -> Self {
        Terminal {
            input,
            output,
            max_line_length,
        }
    }

    /// Prints the prompt and reads one line.
    pub fn read_line(&mut self) -> Result<LineInput> {
        let prompt = self.create_prompt();
        self.output
            .write_all(prompt.as_bytes())
            .and_then(|_| self.output.flush())
            .context("Failed to write prompt")?;

        let limit = self.max_line_length as u64 + 1;
        let mut buf = Vec::new();
        (&mut self.input)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .context("Failed to read input")?;

        if buf.is_empty() {
            return Ok(LineInput::Eof);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() as u64 == limit {
            self.discard_rest_of_line()?;
            return Ok(LineInput::TooLong);
        }

        match String::from_utf8(buf) {
            Ok(line) => Ok(LineInput::Line(line)),
            Err(_) => Ok(LineInput::NotUtf8),
        }
    }

    fn create_prompt(&self) -> String {
        match env::current_dir() {
            Ok(cwd) => format!("{}$ ", cwd.display()),
            // The working directory may have been removed under us.
            Err(_) => "?$ ".to_string(),
        }
    }

    fn discard_rest_of_line(&mut self) -> Result<()> {
        loop {
            let available = self.input.fill_buf().context("Failed to read input")?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.input.consume(pos + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.input.consume(len);
                }
            }
        }
    }
}
