// src/shell/command_parser.rs
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error: empty command near '|'")]
    EmptyCommand,
    #[error("syntax error: missing file name after '{0}'")]
    MissingRedirectTarget(char),
    #[error("syntax error: more than one '{0}' redirection")]
    DuplicateRedirect(char),
    #[error("syntax error: '&' must end the line")]
    BackgroundNotLast,
    #[error("syntax error: unterminated quote {0}")]
    UnterminatedQuote(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SimpleCommand {
    /// Program name followed by its arguments, as handed to exec.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

/// One input line: the stages of a pipeline plus line-wide redirections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLine {
    pub commands: Vec<SimpleCommand>,
    pub background: bool,
    pub input: Option<String>,
    pub output: Option<String>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    Input,
    Output,
    Background,
}

pub struct CommandParser;

impl CommandParser {
    pub fn parse(input: &str) -> Result<ParsedLine, ParseError> {
        let tokens = Self::tokenize(input)?;
        let mut line = ParsedLine::default();
        let mut words: Vec<String> = Vec::new();
        let mut tokens = tokens.into_iter().peekable();

        while let Some(token) = tokens.next() {
            match token {
                Token::Word(word) => words.push(word),
                Token::Pipe => {
                    line.commands.push(Self::finish_command(&mut words)?);
                }
                Token::Input | Token::Output => {
                    let symbol = if token == Token::Input { '<' } else { '>' };
                    let target = match tokens.next() {
                        Some(Token::Word(target)) => target,
                        _ => return Err(ParseError::MissingRedirectTarget(symbol)),
                    };
                    let slot = if token == Token::Input {
                        &mut line.input
                    } else {
                        &mut line.output
                    };
                    if slot.is_some() {
                        return Err(ParseError::DuplicateRedirect(symbol));
                    }
                    *slot = Some(target);
                }
                Token::Background => {
                    if tokens.peek().is_some() {
                        return Err(ParseError::BackgroundNotLast);
                    }
                    line.background = true;
                }
            }
        }

        let blank = line.commands.is_empty()
            && !line.background
            && line.input.is_none()
            && line.output.is_none();
        if words.is_empty() && blank {
            return Ok(line);
        }
        line.commands.push(Self::finish_command(&mut words)?);
        Ok(line)
    }

    fn finish_command(words: &mut Vec<String>) -> Result<SimpleCommand, ParseError> {
        if words.is_empty() {
            return Err(ParseError::EmptyCommand);
        }
        let mut words = std::mem::take(words).into_iter();
        let program = words.next().unwrap_or_default();
        Ok(SimpleCommand {
            program,
            args: words.collect(),
        })
    }

    fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        // Distinguishes an empty quoted word ("") from no word at all.
        let mut in_word = false;
        let mut chars = input.chars();

        while let Some(c) = chars.next() {
            match c {
                '"' | '\'' => {
                    in_word = true;
                    loop {
                        match chars.next() {
                            Some(q) if q == c => break,
                            Some(q) => current.push(q),
                            None => return Err(ParseError::UnterminatedQuote(c)),
                        }
                    }
                }
                '|' | '<' | '>' | '&' => {
                    if in_word {
                        tokens.push(Token::Word(std::mem::take(&mut current)));
                        in_word = false;
                    }
                    tokens.push(match c {
                        '|' => Token::Pipe,
                        '<' => Token::Input,
                        '>' => Token::Output,
                        _ => Token::Background,
                    });
                }
                c if c.is_whitespace() => {
                    if in_word {
                        tokens.push(Token::Word(std::mem::take(&mut current)));
                        in_word = false;
                    }
                }
                c => {
                    in_word = true;
                    current.push(c);
                }
            }
        }

        if in_word {
            tokens.push(Token::Word(current));
        }
        Ok(tokens)
    }
}
