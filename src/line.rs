//! Server-line tokenizer.
//!
//! One inbound line has the shape
//! `[:source] VERB [arg1 ...] [:trailing multi-word arg]`. There are no
//! message tags on a server link; the source token is a SID or UID, and
//! only the first `:`-opened token starts the trailing argument.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::error::{ProtocolError, Result};

/// Parse the source token (after `:`, up to the first space).
fn parse_source(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the verb (alphanumeric; covers words and numerics).
fn parse_verb(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

/// Parse the argument vector, including the trailing argument.
///
/// Consecutive spaces collapse into one separator; a `:`-opened token
/// swallows the rest of the line.
fn parse_args(input: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut rest = input;

    while rest.as_bytes().first() == Some(&b' ') {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            args.push(trailing);
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        args.push(&rest[..end]);
        rest = &rest[end..];
    }
    args
}

/// One tokenized server line, borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Line<'a> {
    /// SID or UID of the sender; `None` means the line carries no source
    /// prefix and is attributed to the uplink.
    pub source: Option<&'a str>,
    pub verb: &'a str,
    pub args: Vec<&'a str>,
}

impl<'a> Line<'a> {
    /// Tokenize a raw line. CR/LF is stripped first.
    pub fn parse(raw: &'a str) -> Result<Line<'a>> {
        let trimmed = raw.trim_end_matches(['\r', '\n']);
        match parse_line(trimmed) {
            Ok((_, line)) => Ok(line),
            Err(_) => Err(ProtocolError::InvalidLine(raw.to_string())),
        }
    }

    /// Positional argument accessor.
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied()
    }
}

fn parse_line(input: &str) -> IResult<&str, Line<'_>> {
    let (input, source) = opt(parse_source)(input)?;
    let (input, _) = space0(input)?;
    let (input, verb) = parse_verb(input)?;
    let args = parse_args(input);
    Ok(("", Line { source, verb, args }))
}
