//! Interactive client commands.
//!
//! `CALC <expression>` / `EXIT`。大文字小文字は区別しない。
//! 式は行の残り全体（空白を含んでよい）。

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Calc(String),
    Exit,
    /// 空行。何もしない
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingExpression,
    Unknown(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingExpression => {
                write!(f, "Invalid command. Expected 1 argument: body")
            }
            ParseError::Unknown(_) => write!(f, "Invalid command."),
        }
    }
}

impl std::error::Error for ParseError {}

pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_uppercase().as_str() {
        "CALC" if rest.is_empty() => Err(ParseError::MissingExpression),
        "CALC" => Ok(Command::Calc(rest.to_string())),
        "EXIT" => Ok(Command::Exit),
        _ => Err(ParseError::Unknown(word.to_string())),
    }
}
